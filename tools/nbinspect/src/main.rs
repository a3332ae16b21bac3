mod app;
mod parse;
mod report;
mod ui;

use std::io;
use std::time::Duration;

use crossterm::event::{self, Event, KeyCode, KeyModifiers};
use crossterm::execute;
use crossterm::terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen};
use ratatui::backend::CrosstermBackend;
use ratatui::Terminal;

use app::{App, InputMode};
use report::{AlignedImage, Target};

struct Options {
    path: String,
    plain: bool,
    target: Target,
}

fn main() {
    let options = parse_args();
    let bytes = match std::fs::read(&options.path) {
        Ok(bytes) => bytes,
        Err(err) => {
            eprintln!("{}: {}", options.path, err);
            std::process::exit(1);
        }
    };
    let image = AlignedImage::from_bytes(&bytes);
    let file_name = std::path::Path::new(&options.path)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| options.path.clone());
    let report = report::inspect(image.bytes(), &options.target, &file_name);
    let loadable = report.verdict.is_ok();

    let result = if options.plain {
        report.write_plain(&mut io::stdout().lock())
    } else {
        run(App::new(report))
    };
    if let Err(err) = result {
        eprintln!("{err}");
        std::process::exit(1);
    }
    if !loadable {
        std::process::exit(2);
    }
}

fn usage() {
    eprintln!("Usage: nbinspect <image> [--plain] [--cpu <part>] [--no-fpu]");
    eprintln!();
    eprintln!("Checks a relocatable network binary and shows its layout.");
    eprintln!();
    eprintln!("  --plain       Print the report instead of opening the viewer");
    eprintln!("  --cpu <part>  Check against this CPUID part number (e.g. 0xc27)");
    eprintln!("  --no-fpu      Check against a processor with the FPU disabled");
    eprintln!();
    eprintln!("Exits with status 2 if the image would be rejected.");
}

fn parse_part(text: &str) -> Option<u16> {
    match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16).ok(),
        None => text.parse().ok(),
    }
}

fn parse_args() -> Options {
    let args: Vec<String> = std::env::args().collect();
    let mut path = None;
    let mut plain = false;
    let mut target = Target {
        part: None,
        fpu: true,
    };
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--plain" => plain = true,
            "--no-fpu" => target.fpu = false,
            "--cpu" => {
                i += 1;
                match args.get(i).and_then(|arg| parse_part(arg)) {
                    Some(part) => target.part = Some(part),
                    None => {
                        eprintln!("--cpu requires a part number");
                        std::process::exit(1);
                    }
                }
            }
            "--help" | "-h" => {
                usage();
                std::process::exit(0);
            }
            other if other.starts_with('-') => {
                eprintln!("Unknown argument: {other}");
                std::process::exit(1);
            }
            other => path = Some(other.to_string()),
        }
        i += 1;
    }
    match path {
        Some(path) => Options {
            path,
            plain,
            target,
        },
        None => {
            usage();
            std::process::exit(1);
        }
    }
}

fn run(mut app: App) -> io::Result<()> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    while !app.should_quit {
        terminal.draw(|f| ui::draw(f, &mut app))?;

        if event::poll(Duration::from_millis(250))? {
            if let Event::Key(key) = event::read()? {
                app.notice = None;
                match app.mode {
                    InputMode::Normal => handle_normal_key(&mut app, key.code, key.modifiers),
                    InputMode::FilterInput => handle_input_key(&mut app, key.code, true),
                    InputMode::SearchInput => handle_input_key(&mut app, key.code, false),
                }
            }
        }
    }

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    Ok(())
}

fn handle_normal_key(app: &mut App, code: KeyCode, modifiers: KeyModifiers) {
    let viewport_height = 20; // approximate; real height comes from render

    match code {
        KeyCode::Char('c') if modifiers.contains(KeyModifiers::CONTROL) => {
            app.should_quit = true;
        }
        KeyCode::Char('q') => app.should_quit = true,
        KeyCode::Tab => app.toggle_pane(),
        KeyCode::Char('f') => {
            app.mode = InputMode::FilterInput;
            app.input_buf.clear();
        }
        KeyCode::Char('F') => {
            app.filter = None;
            app.scroll_offset = 0;
        }
        KeyCode::Char('/') => {
            app.mode = InputMode::SearchInput;
            app.input_buf.clear();
        }
        KeyCode::Esc => {
            app.search = None;
            app.search_match_index = 0;
        }
        KeyCode::Char('n') => app.next_match(),
        KeyCode::Char('N') => app.prev_match(),
        KeyCode::Up | KeyCode::Char('k') => app.scroll_up(),
        KeyCode::Down | KeyCode::Char('j') => {
            let visible_count = app.visible_indices().len();
            app.scroll_down(visible_count, viewport_height);
        }
        KeyCode::Char('g') => app.jump_to_top(),
        KeyCode::Char('G') => {
            let visible_count = app.visible_indices().len();
            app.jump_to_bottom(visible_count, viewport_height);
        }
        _ => {}
    }
}

fn handle_input_key(app: &mut App, code: KeyCode, is_filter: bool) {
    match code {
        KeyCode::Enter => {
            if is_filter {
                app.submit_filter();
            } else {
                app.submit_search();
            }
        }
        KeyCode::Esc => {
            app.input_buf.clear();
            app.mode = InputMode::Normal;
        }
        KeyCode::Backspace => {
            app.input_buf.pop();
        }
        KeyCode::Char(c) => {
            app.input_buf.push(c);
        }
        _ => {}
    }
}
