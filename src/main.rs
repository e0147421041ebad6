//! Raincheck command line
//!
//! Forecasts, bilingual city search, favorites and background rain alerts.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use raincheck_alerts::{
    AlertScheduler, AlertTrigger, ConsoleNotifier, Notifier, PersistentCooldownStore, RunOverrides,
    RunOutcome, RunReport, TriggerConfig, WebhookNotifier,
};
use raincheck_core::{AppError, Config, WeatherError};
use raincheck_store::{Database, LocationStore, SettingsStore};
use raincheck_weather::format::{self, Language, TemperatureUnit};
use raincheck_weather::provider::build_http_client;
use raincheck_weather::{
    ForecastClient, GeoMergeSearch, Location, OpenMeteoGeocoder, OpenMeteoProvider,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Parser)]
#[command(name = "raincheck")]
#[command(about = "Raincheck - forecasts and rain alerts for your favorite places", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run periodic rain checks until interrupted
    Watch,

    /// Run one production rain check now
    Check {
        /// Extra attempts after a service outage, each after a backoff delay
        #[arg(long, default_value = "0")]
        retries: u32,
    },

    /// Run one rain check with test overrides
    TestAlert {
        /// Forced next-hour rain probability (percent)
        #[arg(long, default_value = "85")]
        pct: u8,

        /// Only check the first favorite
        #[arg(long)]
        first_only: bool,

        /// Respect the cooldown window
        #[arg(long)]
        respect_cooldown: bool,

        /// Respect the alerts setting
        #[arg(long)]
        respect_setting: bool,

        /// Extra attempts after a service outage, each after a backoff delay
        #[arg(long, default_value = "0")]
        retries: u32,
    },

    /// Search cities by name
    Search {
        query: String,
    },

    /// Show the forecast for a favorite or searched city
    Forecast {
        query: String,
    },

    /// Manage favorites
    Favorites {
        #[command(subcommand)]
        action: FavoritesAction,
    },

    /// Recently viewed cities
    Recent {
        #[arg(long, default_value = "10")]
        limit: usize,
    },

    /// Show or change settings
    Settings {
        /// Enable or disable rain alerts
        #[arg(long)]
        alerts: Option<bool>,

        /// Show temperatures in Fahrenheit
        #[arg(long)]
        fahrenheit: Option<bool>,
    },

    /// Inspect or reset the notification cooldown
    Cooldown {
        #[command(subcommand)]
        action: CooldownAction,
    },
}

#[derive(Subcommand)]
enum FavoritesAction {
    /// List favorites with their last known forecast
    List,
    /// Search and save a city
    Add {
        query: String,

        /// Which search result to save (1-based)
        #[arg(long, default_value = "1")]
        index: usize,
    },
    /// Remove a favorite by name
    Remove {
        name: String,
    },
}

#[derive(Subcommand)]
enum CooldownAction {
    Show,
    Clear,
}

struct App {
    config: Config,
    db: Arc<Database>,
    forecasts: ForecastClient,
    search: GeoMergeSearch,
    language: Language,
}

impl App {
    fn new(config: Config) -> Result<Self> {
        let db = Arc::new(
            Database::open(config.database_path()).context("Failed to open database")?,
        );

        let accept_language = config.search.primary_language.clone();
        let provider = OpenMeteoProvider::new(&config.api, &accept_language)
            .context("Failed to build forecast client")?;
        let geocoder = OpenMeteoGeocoder::new(&config.api, &accept_language, config.search.max_results)
            .context("Failed to build geocoding client")?;

        let forecasts = ForecastClient::new(Arc::new(provider)).with_sink(db.clone());
        let search = GeoMergeSearch::new(Arc::new(geocoder), &config.search);
        let language = Language::from_tag(&config.alerts.notification_language);

        Ok(Self {
            config,
            db,
            forecasts,
            search,
            language,
        })
    }

    fn unit(&self) -> TemperatureUnit {
        TemperatureUnit::from_setting(self.db.use_fahrenheit().unwrap_or(false))
    }

    fn notifier(&self) -> Result<Arc<dyn Notifier>> {
        let url = &self.config.alerts.webhook_url;
        if url.is_empty() {
            return Ok(Arc::new(ConsoleNotifier::new(self.language)));
        }
        let client = build_http_client(&self.config.api, &self.config.alerts.notification_language)
            .context("Failed to build webhook client")?;
        Ok(Arc::new(WebhookNotifier::new(url.clone(), client, self.language)))
    }

    fn trigger(&self, online: watch::Receiver<bool>) -> Result<AlertTrigger> {
        self.trigger_with(online, TriggerConfig::from_alerts(&self.config.alerts))
    }

    /// A trigger whose one-shots stop after `retries` extra attempts.
    fn one_shot_trigger(&self, online: watch::Receiver<bool>, retries: u32) -> Result<AlertTrigger> {
        let config = TriggerConfig::from_alerts(&self.config.alerts)
            .with_one_shot_max_attempts(retries.saturating_add(1));
        self.trigger_with(online, config)
    }

    fn trigger_with(&self, online: watch::Receiver<bool>, config: TriggerConfig) -> Result<AlertTrigger> {
        let alerts = &self.config.alerts;
        let cooldown = PersistentCooldownStore::new(
            self.db.clone(),
            chrono::TimeDelta::minutes(i64::from(alerts.cooldown_minutes)),
        );
        let scheduler = AlertScheduler::new(
            self.db.clone(),
            self.db.clone(),
            self.forecasts.clone(),
            Arc::new(cooldown),
            self.notifier()?,
            alerts.rain_threshold_pct,
        );
        Ok(AlertTrigger::new(Arc::new(scheduler), config, online))
    }

    /// A saved location matching `query` by name, else the first search hit.
    async fn resolve(&self, query: &str) -> Result<Location> {
        let saved = self.db.list_saved()?;
        if let Some(found) = saved.into_iter().find(|l| l.name.eq_ignore_ascii_case(query.trim())) {
            return Ok(found);
        }
        let found = self.search.search(query).await.into_iter().next();
        Ok(found.ok_or_else(|| WeatherError::NotFound(query.trim().to_string()))?)
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    let config = match path {
        Some(path) => Config::load_from(path)?,
        None => return Ok(Config::load_validated()?.0),
    };

    let validation = config.validate();
    if !validation.is_valid() {
        anyhow::bail!("Configuration validation failed: {}", validation.error_summary());
    }
    for warning in &validation.warnings {
        tracing::warn!("Config warning: {}", warning);
    }
    Ok(config)
}

fn print_report(report: Option<RunReport>) {
    match report {
        Some(report) if report.outcome == RunOutcome::Retry => println!(
            "Weather service unavailable after checking {} location(s); try again later",
            report.checked
        ),
        Some(report) => println!(
            "Checked {} location(s), notified {}: {:?}",
            report.checked,
            report.notified.len(),
            report.outcome
        ),
        None => println!("Run did not complete"),
    }
}

fn print_locations(locations: &[Location]) {
    if locations.is_empty() {
        println!("No results");
        return;
    }
    for (i, location) in locations.iter().enumerate() {
        println!(
            "{:>2}. {} ({:.4}, {:.4})",
            i + 1,
            location.display_name(),
            location.latitude,
            location.longitude
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    raincheck_core::init()?;

    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;
    let app = App::new(config)?;

    // The command line has no connectivity check; the network is assumed up.
    let (_online_tx, online) = watch::channel(true);

    match cli.command {
        Commands::Watch => {
            let trigger = app.trigger(online)?;
            trigger.schedule();
            println!("Watching for rain. Press Ctrl+C to stop.");
            tokio::signal::ctrl_c().await?;
            trigger.shutdown().await;
        }

        Commands::Check { retries } => {
            let trigger = app.one_shot_trigger(online, retries)?;
            trigger.run_once();
            print_report(trigger.wait_one_shot().await);
        }

        Commands::TestAlert {
            pct,
            first_only,
            respect_cooldown,
            respect_setting,
            retries,
        } => {
            let overrides = RunOverrides {
                forced_probability_pct: Some(pct.min(100)),
                send_to_all_saved: !first_only,
                bypass_cooldown: !respect_cooldown,
                bypass_alerts_enabled_check: !respect_setting,
            };
            let trigger = app.one_shot_trigger(online, retries)?;
            trigger.run_once_test(overrides);
            print_report(trigger.wait_one_shot().await);
        }

        Commands::Search { query } => {
            print_locations(&app.search.search(&query).await);
        }

        Commands::Forecast { query } => {
            let location = app.resolve(&query).await?;
            let unit = app.unit();

            match app.forecasts.fetch(&location).await {
                Ok(snapshot) => {
                    println!("{}", location.display_name());
                    println!("{}", format::now_header(&snapshot, unit, app.language));
                    for hour in snapshot.hourly.iter().take(6) {
                        println!(
                            "  {}  {:>7}  {}",
                            hour.time_iso,
                            format::format_temperature(hour.temperature_c, unit, 0, true),
                            format::rain_chip_text(hour.rain_probability_pct, app.language)
                        );
                    }
                    for day in &snapshot.daily {
                        let condition = day.condition();
                        let label = match app.language {
                            Language::Swedish => condition.description_sv(),
                            Language::English => condition.description(),
                        };
                        println!(
                            "  {}  {} {:<16} {} {}  {}%",
                            day.date_iso,
                            condition.emoji(),
                            label,
                            format::high_label(day.t_max_c, unit),
                            format::low_label(day.t_min_c, unit),
                            day.rain_probability_max_pct
                        );
                    }
                }
                Err(e) => {
                    tracing::debug!("Forecast failed: {}", e);
                    let message = match app.language {
                        Language::Swedish => e.user_message(Language::Swedish),
                        Language::English => AppError::from(e).user_message(),
                    };
                    println!("{}", message);
                }
            }
        }

        Commands::Favorites { action } => match action {
            FavoritesAction::List => {
                let unit = app.unit();
                for location in app.db.list_saved()? {
                    let cached = match app.db.cached_forecast(location.id)? {
                        Some(c) => format!(
                            "{}  {}",
                            format::format_temperature(c.current_temperature_c, unit, 0, true),
                            format::rain_chip_text(c.next_hour_rain_pct, app.language)
                        ),
                        None => "-".to_string(),
                    };
                    println!("{}  {}", location.display_name(), cached);
                }
            }
            FavoritesAction::Add { query, index } => {
                let results = app.search.search(&query).await;
                let location = results
                    .get(index.saturating_sub(1))
                    .with_context(|| format!("No result #{} for '{}'", index, query))?;
                let id = app.db.save(location)?;
                println!("Saved {} (id {})", location.display_name(), id);
            }
            FavoritesAction::Remove { name } => {
                let target = app
                    .db
                    .list_saved()?
                    .into_iter()
                    .find(|l| l.name.eq_ignore_ascii_case(name.trim()))
                    .with_context(|| format!("No favorite named '{}'", name))?;
                if app.db.delete(&target)? {
                    println!("Removed {}", target.display_name());
                }
            }
        },

        Commands::Recent { limit } => {
            print_locations(&app.db.list_recent(limit)?);
        }

        Commands::Settings { alerts, fahrenheit } => {
            if let Some(enabled) = alerts {
                app.db.set_alerts_enabled(enabled)?;
            }
            if let Some(enabled) = fahrenheit {
                app.db.set_use_fahrenheit(enabled)?;
            }
            println!("alerts_enabled = {}", app.db.alerts_enabled()?);
            println!("use_fahrenheit = {}", app.db.use_fahrenheit()?);
        }

        Commands::Cooldown { action } => {
            let trigger = app.trigger(online)?;
            match action {
                CooldownAction::Show => match trigger.last_notify_timestamp() {
                    Some(ms) => match chrono::DateTime::from_timestamp_millis(ms) {
                        Some(at) => println!("Last notification: {}", at.with_timezone(&chrono::Local)),
                        None => println!("Last notification: {} ms", ms),
                    },
                    None => println!("No notification recorded"),
                },
                CooldownAction::Clear => {
                    if trigger.clear_cooldown() {
                        println!("Cooldown cleared");
                    } else {
                        println!("Nothing to clear");
                    }
                }
            }
        }
    }

    Ok(())
}
