use chrono::Datelike;
use ratatui::{
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Modifier, Style},
    text::{Line, Span},
    widgets::{block::Title, Block, Borders, Clear, Paragraph, Wrap},
    Frame,
};

use crate::app::Picker;
use crate::availability::gate::LoadStatus;
use crate::calendar::{month_name, weeks, CalendarDay};
use crate::dates::to_local_date_key;
use crate::selection::SelectionState;
use crate::theme::ThemeConfig;

const MONTH_WIDTH: u16 = 30;

// ─── Root draw ────────────────────────────────────────────────────────────────

pub fn draw(f: &mut Frame, picker: &Picker) {
    let area = f.area();
    let t    = &picker.theme;

    f.render_widget(
        Block::default().style(Style::default().bg(t.bg()).fg(t.fg())),
        area,
    );

    // Layout: [ months(10) | summary(4) | filler | status_bar(1) ]
    let root = Layout::default().direction(Direction::Vertical)
        .constraints([
            Constraint::Length(10),
            Constraint::Length(4),
            Constraint::Min(0),
            Constraint::Length(1),
        ]).split(area);

    let cols = Layout::default().direction(Direction::Horizontal)
        .constraints([
            Constraint::Length(MONTH_WIDTH),
            Constraint::Length(MONTH_WIDTH),
            Constraint::Min(0),
        ]).split(root[0]);

    for (i, (month, grid)) in picker.grids().iter().enumerate() {
        let title = format!(" {} {} ", month_name(month.month()), month.year());
        draw_month(f, t, &title, grid, picker, cols[i]);
    }
    draw_summary(f, picker, root[1]);
    draw_statusbar(f, picker, root[3]);

    if picker.show_help {
        draw_help(f, area, t);
    }
}

// ─── Month grid ───────────────────────────────────────────────────────────────

fn draw_month(
    f: &mut Frame, t: &ThemeConfig, title: &str,
    grid: &[CalendarDay; crate::calendar::GRID_CELLS], picker: &Picker, area: Rect,
) {
    let block = Block::default()
        .title(Title::from(Line::from(Span::styled(
            title.to_owned(),
            Style::default().fg(t.accent()).add_modifier(Modifier::BOLD),
        ))))
        .borders(Borders::ALL)
        .border_type(t.border_type())
        .border_style(Style::default().fg(t.border()))
        .style(Style::default().bg(t.bg()));

    let inner = block.inner(area);
    f.render_widget(block, area);

    let mut lines: Vec<Line> = vec![];

    // Header row: Su Mo Tu We Th Fr Sa
    let hdrs: Vec<Span> = ["Su","Mo","Tu","We","Th","Fr","Sa"].iter().enumerate().map(|(i, d)| {
        let style = if i == 0 || i == 6 {
            Style::default().fg(t.weekend_color()).add_modifier(Modifier::BOLD)
        } else {
            Style::default().fg(t.fg_dim()).add_modifier(Modifier::BOLD)
        };
        Span::styled(format!(" {d} "), style)
    }).collect();
    lines.push(Line::from(hdrs));

    for week in weeks(grid) {
        let spans: Vec<Span> = week.iter().enumerate().map(|(col, day)| {
            let weekend = col == 0 || col == 6;
            Span::styled(format!(" {:2} ", day.date.day()), cell_style(t, day, picker, weekend))
        }).collect();
        lines.push(Line::from(spans));
    }

    f.render_widget(
        Paragraph::new(lines).style(Style::default().bg(t.bg())).alignment(Alignment::Left),
        inner,
    );
}

fn cell_style(t: &ThemeConfig, day: &CalendarDay, picker: &Picker, weekend: bool) -> Style {
    if !day.is_current_month {
        return Style::default().fg(t.fg_dim()).add_modifier(Modifier::DIM);
    }
    let cursor = day.date == picker.cursor;

    let mut style = if day.is_selected {
        let (bg, fg) = t.endpoint_highlight();
        Style::default().bg(bg).fg(fg).add_modifier(Modifier::BOLD)
    } else if day.is_in_range {
        let (bg, fg) = t.range_highlight();
        Style::default().bg(bg).fg(fg)
    } else if day.is_booked {
        Style::default().fg(t.booked()).add_modifier(Modifier::CROSSED_OUT)
    } else if day.is_past {
        Style::default().fg(t.fg_dim())
    } else if weekend {
        Style::default().fg(t.weekend_color())
    } else {
        Style::default().fg(t.fg())
    };

    if day.is_today {
        style = style.add_modifier(Modifier::UNDERLINED);
        if !day.is_selected {
            style = style.fg(t.today());
        }
    }
    if cursor {
        style = style.bg(t.cursor()).add_modifier(Modifier::BOLD);
    }
    style
}

// ─── Selection summary ────────────────────────────────────────────────────────

fn draw_summary(f: &mut Frame, picker: &Picker, area: Rect) {
    let t   = &picker.theme;
    let sel = &picker.selection;
    let acc = Style::default().fg(t.accent()).add_modifier(Modifier::BOLD);
    let fg  = Style::default().fg(t.fg());
    let dim = Style::default().fg(t.fg_dim());

    let key = |d: Option<chrono::NaiveDate>| d.map(to_local_date_key).unwrap_or_else(|| "-".into());
    let selection_line = Line::from(vec![
        Span::styled("  Check-in  ", acc),
        Span::styled(key(sel.check_in()), fg),
        Span::styled("    Check-out  ", acc),
        Span::styled(key(sel.check_out()), fg),
        Span::styled("    Nights  ", acc),
        Span::styled(sel.nights().to_string(), fg),
    ]);

    let availability = match (picker.gate.status(), picker.gate.window()) {
        (LoadStatus::Loading, Some(w)) => Span::styled(
            format!("  ⟳ Checking availability from {w}…"),
            Style::default().fg(t.warning()),
        ),
        (LoadStatus::Ready, Some(w)) => Span::styled(
            format!(
                "  ✓ {} of {} nights booked in view",
                picker.gate.booked().len(),
                w.days_in_month() + w.next().days_in_month(),
            ),
            Style::default().fg(t.success()),
        ),
        (LoadStatus::Degraded(_), _) => Span::styled(
            "  ✗ Could not load availability; the server will confirm your dates",
            Style::default().fg(t.error()),
        ),
        _ => Span::styled("  ", dim),
    };
    let next_step = match sel.state() {
        SelectionState::Empty        => "  Pick a check-in date",
        SelectionState::PartialStart => "  Pick a check-out date",
        SelectionState::Complete     => "  Press y to book these dates",
    };

    let block = Block::default()
        .title(Title::from(Line::from(Span::styled(
            format!(" Villa {} ", picker.villa_id()), acc,
        ))))
        .borders(Borders::ALL)
        .border_type(t.border_type())
        .border_style(Style::default().fg(t.border_active()))
        .style(Style::default().bg(t.bg()));

    f.render_widget(
        Paragraph::new(vec![
            selection_line,
            Line::from(vec![availability, Span::styled(next_step, dim)]),
        ]).block(block),
        area,
    );
}

// ─── Status bar ───────────────────────────────────────────────────────────────

fn draw_statusbar(f: &mut Frame, picker: &Picker, area: Rect) {
    let t = &picker.theme;
    let bar = Paragraph::new(Line::from(vec![
        Span::styled(" PICK ", Style::default().bg(t.accent()).fg(t.bg()).add_modifier(Modifier::BOLD)),
        Span::styled(
            "  hjkl:move  Enter:pick  c:clear  y:book  [:prev  ]:next  t:today  ?:help  q:quit",
            Style::default().fg(t.fg_dim()),
        ),
        Span::styled(
            format!("  {}", picker.note),
            Style::default().fg(t.fg_dim()).add_modifier(Modifier::ITALIC),
        ),
    ])).style(Style::default().bg(t.bg2()));
    f.render_widget(bar, area);
}

// ─── Help overlay ────────────────────────────────────────────────────────────

fn draw_help(f: &mut Frame, area: Rect, t: &ThemeConfig) {
    let rect = centered(64, 70, area);
    f.render_widget(Clear, rect);

    let title = Line::from(Span::styled(
        " Keyboard Shortcuts ",
        Style::default().fg(t.accent()).add_modifier(Modifier::BOLD),
    ));
    let block = Block::default()
        .title(Title::from(title))
        .borders(Borders::ALL)
        .border_type(t.border_type())
        .border_style(Style::default().fg(t.border_active()))
        .style(Style::default().bg(t.popup_bg()));

    let accent = Style::default().fg(t.accent()).add_modifier(Modifier::BOLD);
    let dim    = Style::default().fg(t.fg_dim());
    let lines  = vec![
        Line::from(""),
        Line::from(Span::styled("  Navigation", accent)),
        Line::from(Span::styled("  h/j/k/l  ←↓↑→     Move by day / week", dim)),
        Line::from(Span::styled("  [ / ]              Prev / Next month", dim)),
        Line::from(Span::styled("  t                  Jump to today", dim)),
        Line::from(""),
        Line::from(Span::styled("  Dates", accent)),
        Line::from(Span::styled("  Enter / Space      Pick check-in, then check-out", dim)),
        Line::from(Span::styled("  c                  Clear selection", dim)),
        Line::from(Span::styled("  y                  Book the selected stay", dim)),
        Line::from(Span::styled("  A second pick that crosses a booked night", dim)),
        Line::from(Span::styled("  starts a new check-in instead.", dim)),
        Line::from(""),
        Line::from(Span::styled("  General", accent)),
        Line::from(Span::styled("  T                  Cycle theme", dim)),
        Line::from(Span::styled("  ?                  Toggle help (any key closes)", dim)),
        Line::from(Span::styled("  q                  Quit without booking", dim)),
    ];

    f.render_widget(
        Paragraph::new(lines).block(block).style(Style::default().fg(t.fg()))
            .wrap(Wrap { trim: false }),
        rect,
    );
}

// ─── Utilities ────────────────────────────────────────────────────────────────

fn centered(pct_x: u16, pct_y: u16, r: Rect) -> Rect {
    let vert = Layout::default().direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - pct_y) / 2),
            Constraint::Percentage(pct_y),
            Constraint::Percentage((100 - pct_y) / 2),
        ]).split(r);
    Layout::default().direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - pct_x) / 2),
            Constraint::Percentage(pct_x),
            Constraint::Percentage((100 - pct_x) / 2),
        ]).split(vert[1])[1]
}
