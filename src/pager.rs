//! Interactive pager for rendered sessions — scrollback plus live follow.
//!
//! Follow mode polls the file's size and mtime rather than using a
//! filesystem watcher; a change re-renders and, while following, pins the
//! view to the bottom. Scroll position survives reloads otherwise.

use crossterm::event::{self, Event as TermEvent, KeyCode, KeyEventKind, KeyModifiers};
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use ratatui::backend::CrosstermBackend;
use ratatui::style::{Modifier, Style};
use ratatui::text::Line;
use ratatui::widgets::Paragraph;
use ratatui::Terminal;
use std::path::Path;
use std::time::{Duration, SystemTime};

const POLL_INTERVAL: Duration = Duration::from_millis(300);

pub struct PagerOptions {
    pub follow: bool,
}

struct FileStamp {
    mtime: Option<SystemTime>,
    len: u64,
}

fn stamp(path: &Path) -> FileStamp {
    match std::fs::metadata(path) {
        Ok(m) => FileStamp {
            mtime: m.modified().ok(),
            len: m.len(),
        },
        Err(_) => FileStamp {
            mtime: None,
            len: 0,
        },
    }
}

fn changed(a: &FileStamp, b: &FileStamp) -> bool {
    a.len != b.len || a.mtime != b.mtime
}

/// Run the pager over `path`, re-rendering through `render` on change.
pub fn run_pager(
    path: &Path,
    render: impl Fn(&Path) -> anyhow::Result<String>,
    opts: &PagerOptions,
) -> anyhow::Result<()> {
    let mut content = render(path)?;
    let mut last_stamp = stamp(path);
    let mut follow = opts.follow;
    let mut scroll: u16 = 0;

    enable_raw_mode()?;
    let mut stdout = std::io::stdout();
    crossterm::execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = pager_loop(
        &mut terminal,
        path,
        &render,
        &mut content,
        &mut last_stamp,
        &mut follow,
        &mut scroll,
    );

    disable_raw_mode()?;
    crossterm::execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    result
}

fn pager_loop(
    terminal: &mut Terminal<CrosstermBackend<std::io::Stdout>>,
    path: &Path,
    render: &impl Fn(&Path) -> anyhow::Result<String>,
    content: &mut String,
    last_stamp: &mut FileStamp,
    follow: &mut bool,
    scroll: &mut u16,
) -> anyhow::Result<()> {
    loop {
        let line_count = content.lines().count() as u16;
        let mut page: u16 = 1;

        terminal.draw(|frame| {
            let area = frame.area();
            page = area.height.saturating_sub(1).max(1);
            let max_scroll = line_count.saturating_sub(page);
            if *follow {
                *scroll = max_scroll;
            }
            *scroll = (*scroll).min(max_scroll);

            let body = Paragraph::new(content.as_str()).scroll((*scroll, 0));
            frame.render_widget(body, ratatui::layout::Rect { height: area.height.saturating_sub(1), ..area });

            let status = Line::styled(
                format!(
                    " {}  [{}/{}]{}  q quit · j/k scroll · g/G top/bottom · f follow",
                    path.display(),
                    (*scroll).min(max_scroll) + 1,
                    max_scroll + 1,
                    if *follow { "  FOLLOWING" } else { "" },
                ),
                Style::default().add_modifier(Modifier::REVERSED),
            );
            let status_area = ratatui::layout::Rect {
                y: area.height.saturating_sub(1),
                height: 1,
                ..area
            };
            frame.render_widget(Paragraph::new(status), status_area);
        })?;

        if event::poll(POLL_INTERVAL)? {
            if let TermEvent::Key(key) = event::read()? {
                if key.kind != KeyEventKind::Press {
                    continue;
                }
                match key.code {
                    KeyCode::Char('q') | KeyCode::Esc => return Ok(()),
                    KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                        return Ok(());
                    }
                    KeyCode::Up | KeyCode::Char('k') => {
                        *follow = false;
                        *scroll = scroll.saturating_sub(1);
                    }
                    KeyCode::Down | KeyCode::Char('j') => {
                        *follow = false;
                        *scroll = scroll.saturating_add(1);
                    }
                    KeyCode::PageUp => {
                        *follow = false;
                        *scroll = scroll.saturating_sub(page);
                    }
                    KeyCode::PageDown => {
                        *follow = false;
                        *scroll = scroll.saturating_add(page);
                    }
                    KeyCode::Char('g') => {
                        *follow = false;
                        *scroll = 0;
                    }
                    KeyCode::Char('G') => {
                        *follow = false;
                        *scroll = u16::MAX;
                    }
                    KeyCode::Char('f') => {
                        *follow = !*follow;
                    }
                    _ => {}
                }
            }
        } else {
            // Poll tick: reload when the file moved underneath us.
            let now = stamp(path);
            if changed(last_stamp, &now) {
                if let Ok(fresh) = render(path) {
                    *content = fresh;
                }
                *last_stamp = now;
            }
        }
    }
}
