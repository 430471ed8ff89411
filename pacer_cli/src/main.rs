mod cli;
mod error_fmt;
mod run;

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::Parser;
use eyre::WrapErr;
use pacer_config::{CalibrationFile, Config, load_samples_csv, load_workout_toml};
use pacer_core::atomic::write_atomic;
use pacer_core::{
    Calibration, CalibrationStore, ExecutionStep, RegressionCfg, RegressionSample, StepDuration,
    WorkoutDefinition, fit_best_monotonic_on, fit_linear, flatten, validate_steps,
};
use serde_json::json;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt, layer::SubscriberExt};

use crate::cli::{Cli, Commands, ConvertTo, FILE_GUARD, JSON_MODE};
use crate::error_fmt::{exit_code_for_error, format_error_json, humanize};

fn main() {
    let cli = Cli::parse();
    let _ = JSON_MODE.set(cli.json);
    if let Err(e) = real_main(cli) {
        if JSON_MODE.get().copied().unwrap_or(false) {
            eprintln!("{}", format_error_json(&e));
        } else {
            eprintln!("{}", humanize(&e));
        }
        std::process::exit(exit_code_for_error(&e));
    }
}

fn real_main(cli: Cli) -> eyre::Result<()> {
    color_eyre::install()?;
    let cfg = load_config(cli.config.as_deref(), cli.calibration.as_deref())?;
    init_logging(cli.log_level.as_deref(), cli.json, &cfg.logging)?;
    tracing::debug!(cmd = ?cli.cmd, "command");

    match cli.cmd {
        Commands::Plan { workout } => {
            let def = load_workout(&workout)?;
            cmd_plan(&def, cli.json)
        }
        Commands::Run {
            workout,
            ticks_per_second,
            realtime,
            samples_out,
        } => {
            let def = load_workout(&workout)?;
            let shutdown = Arc::new(AtomicBool::new(false));
            {
                let flag = Arc::clone(&shutdown);
                ctrlc::set_handler(move || flag.store(true, Ordering::Relaxed))
                    .wrap_err("install Ctrl-C handler")?;
            }
            let store = CalibrationStore::handle(Calibration::from(&cfg.calibration));
            run::run_workout(
                &cfg,
                store,
                run::RunArgs {
                    workout: def,
                    ticks_per_second,
                    realtime,
                    samples_out,
                },
                cli.json,
                shutdown,
            )?;
            Ok(())
        }
        Commands::Fit {
            samples,
            degree,
            write,
        } => cmd_fit(&cfg, &samples, degree, write.as_deref(), cli.json),
        Commands::Convert { speed, to } => cmd_convert(&cfg, speed, to, cli.json),
    }
}

// ── Loading ──────────────────────────────────────────────────────────────────

fn load_config(path: Option<&Path>, calibration: Option<&Path>) -> eyre::Result<Config> {
    let mut cfg = match path {
        Some(path) => {
            let text = fs::read_to_string(path)
                .wrap_err_with(|| format!("read config {}", path.display()))?;
            pacer_config::load_toml(&text)
                .wrap_err_with(|| format!("parse config {}", path.display()))?
        }
        None => Config::default(),
    };
    if let Some(path) = calibration {
        let text = fs::read_to_string(path)
            .wrap_err_with(|| format!("read calibration {}", path.display()))?;
        let file: CalibrationFile = toml::from_str(&text)
            .wrap_err_with(|| format!("parse config {}", path.display()))?;
        cfg.calibration = file.calibration;
    }
    cfg.validate()?;
    Ok(cfg)
}

fn load_workout(path: &Path) -> eyre::Result<WorkoutDefinition> {
    let text =
        fs::read_to_string(path).wrap_err_with(|| format!("read workout {}", path.display()))?;
    let file =
        load_workout_toml(&text).wrap_err_with(|| format!("parse workout {}", path.display()))?;
    file.validate()?;
    let mut def = WorkoutDefinition::from(&file);
    if def.name.is_empty() {
        def.name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
    }
    Ok(def)
}

/// Console layer on stderr, optional JSON file layer from `[logging]`.
///
/// Console level: `--log-level`, else `RUST_LOG`, else `[logging] level`, else info.
fn init_logging(
    cli_level: Option<&str>,
    json: bool,
    logging: &pacer_config::Logging,
) -> eyre::Result<()> {
    let cfg_level = logging.level.as_deref().unwrap_or("info");
    let console_filter = match cli_level {
        Some(level) => EnvFilter::new(level),
        None => std::env::var("RUST_LOG")
            .map_or_else(|_| EnvFilter::new(cfg_level), EnvFilter::new),
    };

    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();
    if json {
        layers.push(
            fmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .with_filter(console_filter)
                .boxed(),
        );
    } else {
        layers.push(
            fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr)
                .with_filter(console_filter)
                .boxed(),
        );
    }

    if let Some(file) = logging.file.as_deref() {
        let path = Path::new(file);
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let name = path
            .file_name()
            .ok_or_else(|| eyre::eyre!("logging.file must name a file"))?;
        let appender = match logging.rotation.as_deref().unwrap_or("never") {
            "daily" => tracing_appender::rolling::daily(dir, name),
            "hourly" => tracing_appender::rolling::hourly(dir, name),
            _ => tracing_appender::rolling::never(dir, name),
        };
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let _ = FILE_GUARD.set(guard);
        layers.push(
            fmt::layer()
                .json()
                .with_ansi(false)
                .with_writer(writer)
                .with_filter(EnvFilter::new(cfg_level))
                .boxed(),
        );
    }

    tracing::subscriber::set_global_default(tracing_subscriber::registry().with(layers))
        .wrap_err("install tracing subscriber")
}

// ── plan ─────────────────────────────────────────────────────────────────────

fn describe_duration(step: &ExecutionStep) -> String {
    match step.duration {
        Some(StepDuration::Time { ms }) => {
            let s = ms / 1000;
            format!("{}:{:02}", s / 60, s % 60)
        }
        Some(StepDuration::Distance { m }) => format!("{m} m"),
        None => "open".to_string(),
    }
}

fn describe_pace(step: &ExecutionStep) -> String {
    match step.pace {
        Some(p) => match p.end_kmh {
            Some(end) => format!("{:.1}->{:.1} km/h", p.start_kmh, end),
            None => format!("{:.1} km/h", p.start_kmh),
        },
        None => "-".to_string(),
    }
}

fn cmd_plan(def: &WorkoutDefinition, json: bool) -> eyre::Result<()> {
    let steps = flatten(def);
    validate_steps(&steps).map_err(eyre::Report::new)?;
    if !json {
        println!("{}: {} steps", def.name, steps.len());
    }
    for step in &steps {
        if json {
            let repeat = step
                .repeat
                .map(|r| json!({ "iteration": r.iteration, "total": r.total }));
            println!(
                "{}",
                json!({
                    "index": step.index,
                    "key": step.identity_key,
                    "kind": step.kind.to_string(),
                    "phase": step.phase.to_string(),
                    "duration": describe_duration(step),
                    "pace": describe_pace(step),
                    "incline_pct": step.incline_pct,
                    "repeat": repeat,
                })
            );
        } else {
            let repeat = step
                .repeat
                .map(|r| format!(" ({}/{})", r.iteration, r.total))
                .unwrap_or_default();
            println!(
                "{:>3}  {:<8} {:<9} {:<9} {:>8}  {}{}",
                step.index,
                step.identity_key,
                step.kind,
                step.phase,
                describe_duration(step),
                describe_pace(step),
                repeat
            );
        }
    }
    Ok(())
}

// ── fit ──────────────────────────────────────────────────────────────────────

fn cmd_fit(
    cfg: &Config,
    samples: &Path,
    degree: Option<u8>,
    write: Option<&Path>,
    json: bool,
) -> eyre::Result<()> {
    let rows = load_samples_csv(samples)?;
    let samples: Vec<RegressionSample> = rows.iter().map(RegressionSample::from).collect();
    let rcfg = RegressionCfg::from(&cfg.regression);
    let max_degree = degree.unwrap_or(rcfg.max_degree);

    let domain = Calibration::from(&cfg.calibration).domain;
    let fit = fit_best_monotonic_on(&samples, max_degree, rcfg.min_samples, domain)?;
    let linear = fit_linear(&samples, rcfg.min_samples).ok();
    let coefficients = fit.model.coefficients();

    if json {
        println!(
            "{}",
            json!({
                "degree": fit.model.degree(),
                "coefficients": coefficients,
                "r_squared": fit.r_squared,
                "samples": fit.n,
                "observed_min_kmh": fit.observed_min,
                "observed_max_kmh": fit.observed_max,
                "linear": linear.map(|l| json!({ "a": l.a, "b": l.b, "r_squared": l.r_squared })),
            })
        );
    } else {
        println!(
            "polynomial degree {}: {:?} (r² {:.4}, {} samples, {:.1}..{:.1} km/h)",
            fit.model.degree(),
            coefficients,
            fit.r_squared,
            fit.n,
            fit.observed_min,
            fit.observed_max
        );
        if let Some(l) = linear {
            println!("linear: a={:.4} b={:.4} (r² {:.4})", l.a, l.b, l.r_squared);
        }
    }

    if let Some(path) = write {
        let mut cal = Calibration::from(&cfg.calibration);
        cal.polynomial = fit.model;
        let text = pacer_config::to_calibration_toml(&pacer_config::CalibrationCfg::from(&cal))?;
        write_atomic(path, text.as_bytes())
            .wrap_err_with(|| format!("write calibration {}", path.display()))?;
        tracing::info!(path = %path.display(), degree = fit.model.degree(), "calibration written");
        if !json {
            println!("wrote {}", path.display());
        }
    }
    Ok(())
}

// ── convert ──────────────────────────────────────────────────────────────────

fn cmd_convert(cfg: &Config, speed: f64, to: ConvertTo, json: bool) -> eyre::Result<()> {
    if !speed.is_finite() || speed < 0.0 {
        eyre::bail!("speed must be finite and >= 0");
    }
    let cal = Calibration::from(&cfg.calibration);
    let (value, converged) = match to {
        ConvertTo::Raw => {
            let inv = cal.invert(speed);
            (inv.raw, inv.converged)
        }
        ConvertTo::Adjusted => (cal.raw_to_adjusted(speed), true),
    };
    let (from_name, to_name) = match to {
        ConvertTo::Raw => ("adjusted", "raw"),
        ConvertTo::Adjusted => ("raw", "adjusted"),
    };
    if json {
        println!(
            "{}",
            json!({ "from": from_name, "to": to_name, "input_kmh": speed, "value_kmh": value, "converged": converged })
        );
    } else {
        println!("{speed:.2} km/h {from_name} = {value:.3} km/h {to_name}");
        if !converged {
            println!("note: outside the monotonic range, used the linear fallback");
        }
    }
    Ok(())
}
