//! Soundtrack CLI — terminal internet radio player

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use clap::Parser;

use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use crossterm::terminal::{self, EnterAlternateScreen, LeaveAlternateScreen};
use crossterm::ExecutableCommand;
use ratatui::prelude::*;
use ratatui::widgets::*;
use tracing::info;
use tracing_subscriber::EnvFilter;

use soundtrack::audio::{
    rodio_output_factory, DesktopSession, PcmFormat, PlaybackEngine, PlaybackEvent, PlaybackState,
};
use soundtrack::config::playback::{
    DEFAULT_MIME_TYPE, OUTPUT_CHANNELS, OUTPUT_SAMPLE_RATE, RESUME_DELAY_MS,
};
use soundtrack::config::EngineConfig;
use soundtrack::stream::{FileSource, SongTitle};

#[derive(Parser)]
#[command(name = "soundtrack", about = "Terminal internet radio player", version)]
struct Cli {
    /// Stream URL to play
    url: String,

    /// MIME type the stream must declare
    #[arg(long, default_value = DEFAULT_MIME_TYPE)]
    mime: String,

    /// Read the stream from a local ADTS file instead of the network
    #[arg(long)]
    file: Option<PathBuf>,

    /// Delay before resuming after an interruption
    #[arg(long, default_value_t = RESUME_DELAY_MS)]
    resume_delay_ms: u64,

    /// Write logs to this file (RUST_LOG overrides the default filter)
    #[arg(long)]
    log_file: Option<PathBuf>,
}

struct App {
    stream_url: String,
    title: Option<SongTitle>,
    state: PlaybackState,
    status: String,
    songs_seen: u32,
    play_started_at: Option<Instant>,
    running: bool,
}

impl App {
    fn new(url: &str) -> Self {
        Self {
            stream_url: url.to_string(),
            title: None,
            state: PlaybackState::Unprepared,
            status: "Preparing...".to_string(),
            songs_seen: 0,
            play_started_at: None,
            running: true,
        }
    }

    fn on_event(&mut self, event: PlaybackEvent) {
        match event {
            PlaybackEvent::BecameAvailable => self.status = "Ready".to_string(),
            PlaybackEvent::BecameUnavailable => {
                self.status = "Audio unavailable".to_string();
                self.play_started_at = None;
            }
            PlaybackEvent::Played => {
                self.status = "Playing".to_string();
                self.play_started_at = Some(Instant::now());
            }
            PlaybackEvent::Paused => {
                self.status = "Paused".to_string();
                self.play_started_at = None;
            }
            PlaybackEvent::SongChanged(title) => {
                self.title = Some(SongTitle::parse(&title));
                self.songs_seen += 1;
            }
        }
    }
}

fn init_logging(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("soundtrack=info"));
    let file = File::create(path)?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_thread_names(true)
        .with_writer(Mutex::new(file))
        .try_init()
        .map_err(|e| format!("Failed to initialize logging: {}", e))?;
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // The TUI owns the terminal, so logs only go to a file
    if let Some(path) = &cli.log_file {
        init_logging(path)?;
    }

    let config = EngineConfig::new(cli.url.clone())
        .with_mime_type(cli.mime.clone())
        .with_resume_delay(Duration::from_millis(cli.resume_delay_ms));
    let format = PcmFormat::float_interleaved(OUTPUT_SAMPLE_RATE, OUTPUT_CHANNELS);

    let mut builder =
        PlaybackEngine::builder(config, DesktopSession::new(), rodio_output_factory(format));
    if let Some(path) = cli.file {
        info!(path = %path.display(), "Playing from file");
        builder = builder.source(Arc::new(FileSource::new(path, cli.mime.clone())));
    }
    let events = builder.subscribe();

    let engine = match builder.spawn() {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };
    engine.play();

    let mut app = App::new(&cli.url);

    // Enter TUI
    terminal::enable_raw_mode()?;
    io::stdout().execute(EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(io::stdout());
    let mut terminal = Terminal::new(backend)?;

    let tick_rate = Duration::from_millis(100);
    let mut last_tick = Instant::now();

    while app.running {
        terminal.draw(|f| draw_ui(f, &app))?;

        let timeout = tick_rate.saturating_sub(last_tick.elapsed());
        if event::poll(timeout)? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    match key.code {
                        KeyCode::Char('q') | KeyCode::Esc => app.running = false,
                        KeyCode::Char('p') | KeyCode::Char(' ') => engine.toggle_play_pause(),
                        KeyCode::Char('s') => engine.pause_if_playing(),
                        _ => {}
                    }
                }
            }
        }

        if last_tick.elapsed() >= tick_rate {
            last_tick = Instant::now();
            while let Ok(event) = events.try_recv() {
                app.on_event(event);
            }
            app.state = engine.state();
        }
    }

    // Shut the engine down before leaving the alternate screen
    engine.shutdown();

    terminal::disable_raw_mode()?;
    io::stdout().execute(LeaveAlternateScreen)?;

    Ok(())
}

fn draw_ui(f: &mut Frame, app: &App) {
    let area = f.area();

    let outer = Block::default()
        .title(format!(" Soundtrack v{} ", env!("CARGO_PKG_VERSION")))
        .title_alignment(Alignment::Center)
        .borders(Borders::ALL)
        .border_type(BorderType::Rounded);
    let inner = outer.inner(area);
    f.render_widget(outer, area);

    let chunks = Layout::vertical([
        Constraint::Length(5), // now playing
        Constraint::Length(4), // playback
        Constraint::Length(3), // help bar
    ])
    .split(inner);

    draw_now_playing(f, app, chunks[0]);
    draw_playback(f, app, chunks[1]);
    draw_help(f, app, chunks[2]);
}

fn draw_now_playing(f: &mut Frame, app: &App, area: Rect) {
    let (artist, song) = match &app.title {
        Some(title) if !title.song.is_empty() => (title.artist.as_str(), title.song.as_str()),
        Some(title) => (title.artist.as_str(), "---"),
        None => ("---", "---"),
    };
    let max_url_len = area.width.saturating_sub(9) as usize;
    let url_display = truncate_str(&app.stream_url, max_url_len);

    let text = vec![
        Line::from(vec![
            Span::styled("  Artist: ", Style::default().fg(Color::DarkGray)),
            Span::styled(artist, Style::default().fg(Color::White).bold()),
        ]),
        Line::from(vec![
            Span::styled("  Song: ", Style::default().fg(Color::DarkGray)),
            Span::styled(song, Style::default().fg(Color::Yellow)),
        ]),
        Line::from(vec![
            Span::styled("  URL: ", Style::default().fg(Color::DarkGray)),
            Span::styled(url_display, Style::default().fg(Color::DarkGray)),
        ]),
    ];
    f.render_widget(Paragraph::new(text), area);
}

fn draw_playback(f: &mut Frame, app: &App, area: Rect) {
    let status_color = match app.state {
        PlaybackState::Playing => Color::Green,
        PlaybackState::Unavailable => Color::Red,
        _ => Color::Yellow,
    };
    let uptime = match app.play_started_at {
        Some(started) => format_uptime(started),
        None => "00:00".to_string(),
    };
    let state = app.state.to_string();
    let songs = app.songs_seen.to_string();

    let block = Block::default()
        .title(" Playback ")
        .borders(Borders::ALL)
        .border_type(BorderType::Rounded)
        .border_style(Style::default().fg(Color::DarkGray));
    let text = vec![
        Line::from(vec![
            Span::styled("  Status: ", Style::default().fg(Color::DarkGray)),
            Span::styled(&app.status, Style::default().fg(status_color)),
            Span::raw("  "),
            Span::styled("Engine: ", Style::default().fg(Color::DarkGray)),
            Span::styled(&state, Style::default().fg(Color::White)),
        ]),
        Line::from(vec![
            Span::styled("  Uptime: ", Style::default().fg(Color::DarkGray)),
            Span::styled(&uptime, Style::default().fg(Color::White)),
            Span::raw("  "),
            Span::styled("Songs: ", Style::default().fg(Color::DarkGray)),
            Span::styled(&songs, Style::default().fg(Color::White)),
        ]),
    ];
    f.render_widget(Paragraph::new(text).block(block), area);
}

fn draw_help(f: &mut Frame, app: &App, area: Rect) {
    let toggle_label = if app.state.is_active() { "Pause" } else { "Play" };
    let key = Style::default().fg(Color::Cyan).bold();
    let label = Style::default().fg(Color::DarkGray);
    let help = Line::from(vec![
        Span::styled("  [p]", key),
        Span::styled(format!(" {}  ", toggle_label), label),
        Span::styled("[s]", key),
        Span::styled(" Stop  ", label),
        Span::styled("[q]", key),
        Span::styled(" Quit", label),
    ]);
    let block = Block::default()
        .borders(Borders::ALL)
        .border_type(BorderType::Rounded)
        .border_style(Style::default().fg(Color::DarkGray));
    f.render_widget(Paragraph::new(help).block(block), area);
}

fn format_uptime(started: Instant) -> String {
    let secs = started.elapsed().as_secs();
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{:02}:{:02}:{:02}", h, m, s)
    } else {
        format!("{:02}:{:02}", m, s)
    }
}

fn truncate_str(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else if max > 3 {
        let kept: String = s.chars().take(max - 3).collect();
        format!("{}...", kept)
    } else {
        s.chars().take(max).collect()
    }
}
