mod api;
mod app;
mod availability;
mod calendar;
mod config;
mod dates;
mod selection;
mod theme;
mod ui;

use anyhow::{anyhow, Context, Result};
use api::ApiClient;
use app::Picker;
use availability::gate::{AvailabilityGate, LoadStatus};
use calendar::YearMonth;
use config::AppConfig;
use selection::Selection;
use std::sync::Arc;
use theme::ThemeConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const USAGE: &str = "\
Usage:
  vb pick <villa-id> [--month YYYY-MM] [--check-in YYYY-MM-DD] [--check-out YYYY-MM-DD] [--dry-run]
  vb booked <villa-id> [YYYY-MM]";

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();

    match args.get(1).map(|s| s.as_str()) {
        // ── vb booked <villa> [month] ─────────────────────────────────────────
        Some("booked") => cmd_booked(&args[2..]).await,
        // ── vb pick <villa> … ─────────────────────────────────────────────────
        Some("pick")   => cmd_pick(&args[2..]).await,
        _ => {
            println!("{USAGE}");
            Ok(())
        }
    }
}

// ─── Booked dates command ─────────────────────────────────────────────────────

async fn cmd_booked(args: &[String]) -> Result<()> {
    // Logging to stderr so it doesn't interfere with the printed dates
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let villa_id = args.first().ok_or_else(|| anyhow!("missing villa id\n{USAGE}"))?;
    let window = match args.get(1) {
        Some(m) => m.parse::<YearMonth>()?,
        None    => YearMonth::from_date(dates::today()),
    };

    let cfg = AppConfig::load()?;
    let api = Arc::new(ApiClient::new(&cfg.api)?);
    let mut gate = AvailabilityGate::new(api, villa_id.as_str());
    gate.request(window);
    gate.settle().await;

    if let LoadStatus::Degraded(reason) = gate.status() {
        return Err(anyhow!("could not load availability for {villa_id}: {reason}"));
    }
    println!("Booked nights for {villa_id}, {window} to {}:", window.next());
    if gate.booked().is_empty() {
        println!("  (none)");
    }
    for d in gate.booked().iter() {
        println!("  {}", dates::to_local_date_key(d));
    }
    Ok(())
}

// ─── Picker command ───────────────────────────────────────────────────────────

struct PickArgs {
    villa_id:  String,
    month:     Option<YearMonth>,
    check_in:  Option<chrono::NaiveDate>,
    check_out: Option<chrono::NaiveDate>,
    dry_run:   bool,
}

fn parse_pick_args(args: &[String]) -> Result<PickArgs> {
    let mut it = args.iter();
    let villa_id = it.next()
        .filter(|a| !a.starts_with("--"))
        .ok_or_else(|| anyhow!("missing villa id\n{USAGE}"))?
        .clone();

    let mut out = PickArgs { villa_id, month: None, check_in: None, check_out: None, dry_run: false };
    while let Some(flag) = it.next() {
        let mut value = || it.next().ok_or_else(|| anyhow!("{flag} needs a value"));
        match flag.as_str() {
            "--month"     => out.month     = Some(value()?.parse()?),
            "--check-in"  => out.check_in  = Some(dates::parse_local_date_key(value()?)?),
            "--check-out" => out.check_out = Some(dates::parse_local_date_key(value()?)?),
            "--dry-run"   => out.dry_run   = true,
            other         => return Err(anyhow!("unknown option {other}\n{USAGE}")),
        }
    }
    Ok(out)
}

async fn cmd_pick(args: &[String]) -> Result<()> {
    let opts = parse_pick_args(args)?;

    let log_dir = dirs::data_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join("villabook");
    std::fs::create_dir_all(&log_dir)?;
    let file_appender = tracing_appender::rolling::daily(&log_dir, "villabook.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(non_blocking))
        .init();

    tracing::info!("Starting villabook picker for {}", opts.villa_id);

    let cfg   = AppConfig::load().unwrap_or_default();
    let theme = ThemeConfig::load(cfg.theme_name())?;
    let api   = Arc::new(ApiClient::new(&cfg.api)?);
    let today = dates::today();

    let start = opts.month
        .or_else(|| opts.check_in.map(YearMonth::from_date))
        .unwrap_or_else(|| YearMonth::from_date(today));
    let selection = Selection::seeded(opts.check_in, opts.check_out, today);
    let gate      = AvailabilityGate::new(api.clone(), opts.villa_id.as_str());

    let mut picker = Picker::new(gate, theme, start, selection, today);
    let Some(stay) = picker.run().await? else {
        println!("No dates booked.");
        return Ok(());
    };

    println!("Selected {} → {} ({} nights) at {}", stay.check_in, stay.check_out, stay.nights, opts.villa_id);
    if opts.dry_run {
        println!("{}", serde_json::to_string_pretty(&stay)?);
        return Ok(());
    }

    let receipt = api.create_booking(&opts.villa_id, &stay).await
        .context("booking request failed")?;
    println!(
        "Booking {} created{}{}",
        receipt.id,
        receipt.status.map(|s| format!(", status {s}")).unwrap_or_default(),
        receipt.total_price.map(|p| format!(", total {p:.2}")).unwrap_or_default(),
    );
    Ok(())
}
