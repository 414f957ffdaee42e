use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use anyhow::{bail, Context, Result};
use crossterm::{
    execute,
    event::{EnableMouseCapture, DisableMouseCapture},
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{Terminal, backend::CrosstermBackend};

use allowclick_core::logger;
use allowclick_core::matcher::{self, TemplateSet};
use allowclick_core::orchestrator::DetectionLoop;
use allowclick_core::platform::{create_platform, hotkey};
use allowclick_core::settings::{Config, ConfigHandle};

struct Args {
    stub: bool,
    settings: Option<PathBuf>,
    templates: Vec<PathBuf>,
    start: bool,
}

fn parse_args() -> Result<Args> {
    let mut args = Args { stub: false, settings: None, templates: Vec::new(), start: false };
    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--stub" => args.stub = true,
            "--start" => args.start = true,
            "--settings" => {
                args.settings = Some(it.next().map(PathBuf::from).context("--settings needs a path")?);
            }
            "--template" => {
                args.templates.push(it.next().map(PathBuf::from).context("--template needs a path")?);
            }
            other => bail!("unknown argument {} (expected --stub, --start, --settings <path>, --template <path>)", other),
        }
    }
    Ok(args)
}

fn main() -> Result<()> {
    let args = parse_args()?;
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));

    logger::init(&cwd.join("logs"))?;
    for prefix in ["window", "match"] {
        logger::register_prefix(prefix, logger::COLOR_BLUE);
    }
    for prefix in ["click", "loop"] {
        logger::register_prefix(prefix, logger::COLOR_GREEN);
    }
    logger::register_prefix("debug", logger::COLOR_GRAY);

    let platform = create_platform(args.stub);

    let settings_path = args.settings.unwrap_or_else(|| cwd.join("settings.toml"));
    let config = Config::load(&settings_path);
    let auto_start = args.start || config.app.auto_start;

    let mut paths = config.detection.templates.clone();
    for p in args.templates {
        if !paths.contains(&p) {
            paths.push(p);
        }
    }
    if paths.is_empty() {
        paths = matcher::discover_defaults(&cwd);
    }
    let templates = TemplateSet::load_paths(&paths);
    logger::info(&format!("loaded {} template(s), watching for \"{}\"", templates.len(), config.window.title));

    let detection = DetectionLoop::new(platform, ConfigHandle::new(config), templates);

    let (log_tx, log_rx) = std::sync::mpsc::channel::<String>();
    logger::set_ui_sender(log_tx);
    logger::info("allowclick started");

    let hotkey_flag = Arc::new(AtomicBool::new(false));
    hotkey::start_hotkey_listener(Arc::clone(&hotkey_flag));

    if auto_start {
        if let Err(e) = detection.start() {
            logger::warn(&format!("auto start skipped: {}", e));
        }
    }

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut app = allowclick_tui::App::new(detection.clone(), log_rx, settings_path);
    let result = allowclick_tui::event::run(&mut terminal, &mut app, &hotkey_flag);

    detection.stop("shutdown");

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen, DisableMouseCapture)?;
    terminal.show_cursor()?;

    result
}
