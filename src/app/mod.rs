use anyhow::Result;
use chrono::{DateTime, Duration, Local, Months, NaiveDate, TimeZone};
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEvent},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{backend::CrosstermBackend, Terminal};
use std::io;

use crate::{
    availability::gate::{AvailabilityGate, LoadStatus},
    calendar::{build_month_grid, CalendarDay, YearMonth, GRID_CELLS},
    dates::{is_same_day, is_strictly_before, local_date_key, to_local_date_key},
    selection::{ClickOutcome, Selection, SelectionState, Stay},
    theme::ThemeConfig,
    ui::draw,
};

// ─── Picker state ─────────────────────────────────────────────────────────────

pub struct Picker {
    pub theme:     ThemeConfig,
    pub theme_idx: usize,
    pub gate:      AvailabilityGate,
    pub selection: Selection,
    /// First of the two visible months.
    pub view:      YearMonth,
    /// Keyboard cursor; doubles as the hovered day for range previews.
    pub cursor:    NaiveDate,
    pub today:     NaiveDate,
    pub note:      String,
    pub show_help: bool,
    running:       bool,
    confirmed:     Option<Stay>,
}

impl Picker {
    pub fn new(
        gate: AvailabilityGate, theme: ThemeConfig,
        start: YearMonth, selection: Selection, today: NaiveDate,
    ) -> Self {
        let idx    = ThemeConfig::all_themes().iter().position(|t| t.name == theme.name).unwrap_or(0);
        let cursor = selection.check_in()
            .filter(|d| start.contains(*d) || start.next().contains(*d))
            .unwrap_or_else(|| if start.contains(today) { today } else { start.first_day() });
        Self {
            theme, theme_idx: idx, gate, selection,
            view: start, cursor, today,
            note: String::new(),
            show_help: false,
            running: true,
            confirmed: None,
        }
    }

    pub fn villa_id(&self) -> &str { self.gate.villa_id() }

    pub fn is_running(&self) -> bool { self.running }

    /// The two visible months with their grids.
    pub fn grids(&self) -> [(YearMonth, [CalendarDay; GRID_CELLS]); 2] {
        [self.view, self.view.next()].map(|m| {
            (m, build_month_grid(m, self.gate.booked(), &self.selection, Some(self.cursor), self.today))
        })
    }

    // ── TUI loop ──────────────────────────────────────────────────────────────

    /// Run until the user confirms a stay or quits.
    pub async fn run(&mut self) -> Result<Option<Stay>> {
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
        let backend  = CrosstermBackend::new(stdout);
        let mut term = Terminal::new(backend)?;

        let result = self.event_loop(&mut term).await;

        disable_raw_mode()?;
        execute!(term.backend_mut(), LeaveAlternateScreen, DisableMouseCapture)?;
        term.show_cursor()?;
        self.gate.close();
        result?;
        Ok(self.take_confirmed())
    }

    async fn event_loop(
        &mut self,
        term: &mut Terminal<CrosstermBackend<io::Stdout>>,
    ) -> Result<()> {
        self.open();

        let tick = std::time::Duration::from_millis(50);
        let mut clock = Local::now();
        while self.running {
            let now = Local::now();
            self.observe_clock(&clock, &now);
            clock = now;

            term.draw(|f| draw(f, self))?;

            if self.gate.poll() { self.on_availability(); }

            if event::poll(tick)? {
                if let Event::Key(key) = event::read()? {
                    self.on_key(key);
                }
            }
            // Let the fetch task make progress between frames.
            tokio::task::yield_now().await;
        }
        Ok(())
    }

    pub fn open(&mut self) {
        tracing::info!("picker open for {} at {}", self.villa_id(), self.view);
        self.gate.request(self.view);
    }

    /// Fresh booked dates may invalidate what was picked earlier.
    pub fn on_availability(&mut self) {
        if self.selection.reconcile(self.gate.booked()) {
            self.note = "Selection changed: those dates are no longer free".into();
        }
        if let LoadStatus::Degraded(reason) = self.gate.status() {
            tracing::warn!("showing calendar without availability: {reason}");
        }
    }

    /// Move `today` forward when the wall clock passes midnight with the
    /// picker open. A check-in that slipped into the past is dropped.
    pub fn observe_clock<Tz: TimeZone>(&mut self, previous: &DateTime<Tz>, now: &DateTime<Tz>) {
        if is_same_day(previous, now) || !is_strictly_before(previous, now) {
            return;
        }
        self.today = now.date_naive();
        tracing::info!("day rolled over to {}", local_date_key(now));
        if self.selection.check_in().is_some_and(|d| d < self.today) {
            self.selection.clear();
            self.note = "Check-in date has passed; selection cleared".into();
        }
    }

    // ── Input ─────────────────────────────────────────────────────────────────

    pub fn on_key(&mut self, key: KeyEvent) {
        if self.show_help {
            self.show_help = false;
            return;
        }
        match key.code {
            KeyCode::Char('q')                  => self.running = false,
            KeyCode::Char('?')                  => self.show_help = true,
            KeyCode::Right | KeyCode::Char('l') => self.move_cursor(1),
            KeyCode::Left  | KeyCode::Char('h') => self.move_cursor(-1),
            KeyCode::Down  | KeyCode::Char('j') => self.move_cursor(7),
            KeyCode::Up    | KeyCode::Char('k') => self.move_cursor(-7),
            KeyCode::Char(']')                  => self.page(1),
            KeyCode::Char('[')                  => self.page(-1),
            KeyCode::Char('t')                  => self.jump_to(self.today),
            KeyCode::Enter | KeyCode::Char(' ') => self.click_cursor(),
            KeyCode::Char('c') => {
                self.selection.clear();
                self.note = "Selection cleared".into();
            }
            KeyCode::Char('y') => self.confirm(),
            // Shift+T cycles themes
            KeyCode::Char('T') => {
                let themes = ThemeConfig::all_themes();
                self.theme_idx = (self.theme_idx + 1) % themes.len();
                self.theme     = themes[self.theme_idx].clone();
                if let Err(e) = self.theme.save() {
                    tracing::warn!("could not save theme: {e}");
                }
            }
            _ => {}
        }
    }

    pub fn click_cursor(&mut self) {
        let cursor = self.cursor;
        let day = self.grids().into_iter()
            .find(|(m, _)| m.contains(cursor))
            .and_then(|(_, grid)| grid.into_iter().find(|d| d.date == cursor && d.is_current_month));
        let Some(day) = day else { return };

        // Completing a span needs booked data for every night in it.
        if let (SelectionState::PartialStart, Some(c)) = (self.selection.state(), self.selection.check_in()) {
            if day.is_selectable() && day.date > c && !self.gate.covers(c, day.date) {
                if self.gate.is_loading() {
                    self.note = "Still checking availability; pick the check-out once it loads".into();
                    return;
                }
                tracing::debug!("check-in {c} is outside the loaded window, restarting at {}", day.date_key);
                self.selection.clear();
                self.selection.click(&day, self.gate.booked());
                self.note = format!(
                    "Check-in {} is no longer loaded; check-in moved to {}",
                    to_local_date_key(c), day.date_key,
                );
                return;
            }
        }

        let outcome = self.selection.click(&day, self.gate.booked());
        self.note = match outcome {
            ClickOutcome::Ignored if day.is_booked => format!("{} is already booked", day.date_key),
            ClickOutcome::Ignored         => format!("{} cannot be selected", day.date_key),
            ClickOutcome::Started
            | ClickOutcome::Restarted     => format!("Check-in {}: now pick check-out", day.date_key),
            ClickOutcome::Completed       => format!(
                "{} nights selected, press y to book", self.selection.nights(),
            ),
            ClickOutcome::RejectedOverlap => format!(
                "Range crosses a booked night; check-in moved to {}", day.date_key,
            ),
        };
    }

    pub fn confirm(&mut self) {
        if self.gate.is_loading() {
            self.note = "Still checking availability; confirm once it loads".into();
            return;
        }
        match self.selection.confirm() {
            Some(stay) => {
                tracing::info!("stay confirmed: {} -> {}", stay.check_in, stay.check_out);
                self.confirmed = Some(stay);
                self.running   = false;
            }
            None => self.note = "Pick a check-in and a check-out first".into(),
        }
    }

    pub fn take_confirmed(&mut self) -> Option<Stay> { self.confirmed.take() }

    // ── Navigation ────────────────────────────────────────────────────────────

    fn move_cursor(&mut self, days: i64) {
        self.jump_to(self.cursor + Duration::days(days));
    }

    fn jump_to(&mut self, date: NaiveDate) {
        self.cursor = date;
        let view = if date < self.view.first_day() {
            YearMonth::from_date(date)
        } else if date >= self.view.next().next().first_day() {
            YearMonth::from_date(date).prev()
        } else {
            self.view
        };
        self.set_view(view);
    }

    fn page(&mut self, delta: i32) {
        let view = if delta >= 0 { self.view.next() } else { self.view.prev() };
        let months = Months::new(delta.unsigned_abs());
        let moved = if delta >= 0 {
            self.cursor.checked_add_months(months)
        } else {
            self.cursor.checked_sub_months(months)
        };
        if let Some(c) = moved {
            self.cursor = c;
        }
        self.set_view(view);
        if !(self.view.contains(self.cursor) || self.view.next().contains(self.cursor)) {
            self.cursor = self.view.first_day();
        }
    }

    fn set_view(&mut self, view: YearMonth) {
        if view != self.view {
            self.view = view;
            self.gate.request(view);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::availability::testing::FakeSource;
    use crossterm::event::KeyModifiers;
    use std::sync::Arc;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn key(c: KeyCode) -> KeyEvent {
        KeyEvent::new(c, KeyModifiers::NONE)
    }

    async fn picker(source: FakeSource, today: NaiveDate) -> Picker {
        let gate = AvailabilityGate::new(Arc::new(source), "villa-1");
        let mut p = Picker::new(
            gate, ThemeConfig::default(), YearMonth::from_date(today), Selection::default(), today,
        );
        p.open();
        p.gate.settle().await;
        p.on_availability();
        p
    }

    #[tokio::test]
    async fn keyboard_booking_flow() {
        let source = FakeSource::with(vec![((2025, 6), vec!["2025-06-12"])]);
        let mut p  = picker(source, ymd(2025, 6, 2)).await;
        assert_eq!(p.cursor, ymd(2025, 6, 2));

        // Move to the 5th, pick it, move to the 8th, pick it.
        for _ in 0..3 { p.on_key(key(KeyCode::Right)); }
        p.on_key(key(KeyCode::Enter));
        for _ in 0..3 { p.on_key(key(KeyCode::Char('l'))); }
        p.on_key(key(KeyCode::Char(' ')));
        assert_eq!(p.selection.nights(), 3);

        p.on_key(key(KeyCode::Char('y')));
        assert!(!p.is_running());
        assert_eq!(p.take_confirmed(), Some(Stay {
            check_in: "2025-06-05".into(), check_out: "2025-06-08".into(), nights: 3,
        }));
    }

    #[tokio::test]
    async fn confirm_without_a_range_keeps_the_picker_open() {
        let mut p = picker(FakeSource::default(), ymd(2025, 6, 2)).await;
        p.on_key(key(KeyCode::Char('y')));
        assert!(p.is_running());
        assert!(p.take_confirmed().is_none());
    }

    #[tokio::test]
    async fn clicking_a_booked_day_says_so() {
        let source = FakeSource::with(vec![((2025, 6), vec!["2025-06-02"])]);
        let mut p  = picker(source, ymd(2025, 6, 2)).await;

        p.click_cursor();
        assert!(p.note.contains("already booked"));
        assert_eq!(p.selection.check_in(), None);
    }

    #[tokio::test]
    async fn cursor_past_the_second_month_pages_and_refetches() {
        let source = FakeSource::with(vec![((2025, 8), vec!["2025-08-15"])]);
        let mut p  = picker(source, ymd(2025, 7, 28)).await;
        assert_eq!(p.view, YearMonth::new(2025, 7).unwrap());

        // Five weeks down lands in September.
        for _ in 0..5 { p.on_key(key(KeyCode::Down)); }
        assert_eq!(p.cursor, ymd(2025, 9, 1));
        assert_eq!(p.view, YearMonth::new(2025, 8).unwrap());
        assert!(p.gate.is_loading());

        p.gate.settle().await;
        assert!(p.gate.booked().contains(ymd(2025, 8, 15)));
        assert_eq!(p.gate.window(), Some(YearMonth::new(2025, 8).unwrap()));
    }

    #[tokio::test]
    async fn paging_moves_view_and_cursor() {
        let mut p = picker(FakeSource::default(), ymd(2025, 1, 31)).await;

        p.on_key(key(KeyCode::Char(']')));
        assert_eq!(p.view, YearMonth::new(2025, 2).unwrap());
        assert_eq!(p.cursor, ymd(2025, 2, 28));

        p.on_key(key(KeyCode::Char('[')));
        p.on_key(key(KeyCode::Char('[')));
        assert_eq!(p.view, YearMonth::new(2024, 12).unwrap());
        assert_eq!(p.cursor, ymd(2024, 12, 28));

        p.on_key(key(KeyCode::Char('t')));
        assert_eq!(p.cursor, ymd(2025, 1, 31));
        assert_eq!(p.view, YearMonth::new(2024, 12).unwrap());
    }

    #[tokio::test]
    async fn failed_fetch_still_lets_the_user_pick() {
        let source = FakeSource::failing(crate::availability::AvailabilityError::Network("timeout".into()));
        let mut p  = picker(source, ymd(2025, 6, 2)).await;
        assert!(matches!(p.gate.status(), LoadStatus::Degraded(_)));

        p.click_cursor();
        assert_eq!(p.selection.check_in(), Some(ymd(2025, 6, 2)));
    }

    #[tokio::test]
    async fn fresh_bookings_trim_a_seeded_selection() {
        let today  = ymd(2025, 6, 2);
        let source = FakeSource::with(vec![((2025, 6), vec!["2025-06-07"])]);
        let gate   = AvailabilityGate::new(Arc::new(source), "villa-1");
        let seeded = Selection::seeded(Some(ymd(2025, 6, 5)), Some(ymd(2025, 6, 9)), today);
        let mut p  = Picker::new(gate, ThemeConfig::default(), YearMonth::from_date(today), seeded, today);
        assert_eq!(p.cursor, ymd(2025, 6, 5));

        p.open();
        p.gate.settle().await;
        p.on_availability();
        assert_eq!(p.selection.check_in(), Some(ymd(2025, 6, 5)));
        assert_eq!(p.selection.check_out(), None);
        assert!(p.note.contains("no longer free"));
    }

    #[tokio::test]
    async fn no_stay_is_completed_or_confirmed_while_the_window_loads() {
        let source = FakeSource::with(vec![((2025, 9), vec!["2025-09-07"])]);
        let mut p  = picker(source, ymd(2025, 6, 2)).await;

        for _ in 0..3 { p.on_key(key(KeyCode::Char(']'))); }
        assert_eq!(p.view, YearMonth::new(2025, 9).unwrap());
        assert!(p.gate.is_loading());

        p.cursor = ymd(2025, 9, 5);
        p.click_cursor();
        p.cursor = ymd(2025, 9, 10);
        p.click_cursor();
        assert_eq!(p.selection.check_in(), Some(ymd(2025, 9, 5)));
        assert_eq!(p.selection.check_out(), None);
        assert!(p.note.contains("Still checking"));

        p.on_key(key(KeyCode::Char('y')));
        assert!(p.is_running());
        assert!(p.take_confirmed().is_none());

        // Once September lands, the same span crosses the booked 7th.
        p.gate.settle().await;
        p.on_availability();
        p.click_cursor();
        assert_eq!(p.selection.check_in(), Some(ymd(2025, 9, 10)));
        assert_eq!(p.selection.check_out(), None);
    }

    #[tokio::test]
    async fn confirm_waits_for_a_pending_refetch() {
        let mut p = picker(FakeSource::default(), ymd(2025, 6, 2)).await;
        p.cursor = ymd(2025, 6, 5);
        p.click_cursor();
        p.cursor = ymd(2025, 6, 8);
        p.click_cursor();
        assert_eq!(p.selection.state(), SelectionState::Complete);

        p.on_key(key(KeyCode::Char(']')));
        p.on_key(key(KeyCode::Char('y')));
        assert!(p.is_running());
        assert_eq!(p.selection.state(), SelectionState::Complete);

        p.gate.settle().await;
        p.on_availability();
        p.on_key(key(KeyCode::Char('y')));
        assert!(!p.is_running());
        assert_eq!(p.take_confirmed().map(|s| s.nights), Some(3));
    }

    #[tokio::test]
    async fn check_in_left_behind_by_paging_is_not_completed_blind() {
        let source = FakeSource::with(vec![((2025, 6), vec!["2025-06-29"])]);
        let mut p  = picker(source, ymd(2025, 6, 2)).await;

        p.cursor = ymd(2025, 6, 28);
        p.click_cursor();
        assert_eq!(p.selection.check_in(), Some(ymd(2025, 6, 28)));

        p.on_key(key(KeyCode::Char(']')));
        p.gate.settle().await;
        p.on_availability();
        assert!(!p.gate.booked().contains(ymd(2025, 6, 29)));

        p.cursor = ymd(2025, 7, 3);
        p.click_cursor();
        assert_eq!(p.selection.check_in(), Some(ymd(2025, 7, 3)));
        assert_eq!(p.selection.check_out(), None);
        assert!(p.note.contains("no longer loaded"));
    }

    #[tokio::test]
    async fn span_inside_the_loaded_window_still_completes_across_months() {
        let mut p = picker(FakeSource::default(), ymd(2025, 6, 2)).await;
        p.cursor = ymd(2025, 6, 28);
        p.click_cursor();
        p.cursor = ymd(2025, 7, 3);
        p.click_cursor();
        assert_eq!(p.selection.check_out(), Some(ymd(2025, 7, 3)));
        assert_eq!(p.selection.nights(), 5);
    }

    #[tokio::test]
    async fn midnight_rolls_today_forward() {
        use chrono::FixedOffset;

        let mut p = picker(FakeSource::default(), ymd(2025, 6, 2)).await;
        p.click_cursor();
        assert_eq!(p.selection.check_in(), Some(ymd(2025, 6, 2)));

        let tz      = FixedOffset::west_opt(5 * 3600).unwrap();
        let evening = tz.with_ymd_and_hms(2025, 6, 2, 23, 59, 0).unwrap();
        let later   = tz.with_ymd_and_hms(2025, 6, 2, 23, 59, 50).unwrap();
        let morning = tz.with_ymd_and_hms(2025, 6, 3, 0, 0, 10).unwrap();

        p.observe_clock(&evening, &later);
        assert_eq!(p.today, ymd(2025, 6, 2));
        p.observe_clock(&morning, &evening);
        assert_eq!(p.today, ymd(2025, 6, 2));

        p.observe_clock(&later, &morning);
        assert_eq!(p.today, ymd(2025, 6, 3));
        assert_eq!(p.selection.check_in(), None);
        assert!(p.note.contains("passed"));
    }

    #[tokio::test]
    async fn help_overlay_swallows_one_key() {
        let mut p = picker(FakeSource::default(), ymd(2025, 6, 2)).await;
        p.on_key(key(KeyCode::Char('?')));
        assert!(p.show_help);
        p.on_key(key(KeyCode::Char('q')));
        assert!(!p.show_help);
        assert!(p.is_running());
    }
}
