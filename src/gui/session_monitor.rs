use std::{
    io::stdout,
    sync::mpsc::{self, Receiver, Sender, TryRecvError},
    thread::{spawn, JoinHandle},
    time::Duration,
};

use crate::device::Device;
use crate::error::Result;
use crate::gui::error::GuiError;
use crate::session::{Session, SessionStatus};

use crossterm::{
    event::{self, KeyCode, KeyEventKind, KeyModifiers},
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
    ExecutableCommand,
};
use log::info;
use ratatui::{
    prelude::*,
    widgets::{
        block::{Position, Title},
        *,
    },
    Terminal,
};

const RECENT_LINES: usize = 12;

enum ThreadMessage {
    Stop,
}

/// Run `session` until the user presses Esc or Ctrl+C, showing its progress.
///
/// Polling happens on a thread of its own, which is the only thread that
/// touches the device and the logfile. Lines typed at the bottom of the
/// screen are sent to the device when Enter is pressed. The session comes
/// back, still open, so that the caller can close it. The poll thread is
/// always stopped and joined before this returns; if polling or the terminal
/// failed, the session has already been dropped (and so closed) and the
/// error comes back instead.
pub fn monitor_session<D>(mut session: Session<D>) -> Result<Session<D>>
where
    D: Device + 'static,
{
    let (user_tx, user_rx) = mpsc::channel::<String>();
    session.set_user_input(user_rx);

    let (stop_tx, stop_rx) = mpsc::channel();
    let (status_tx, status_rx) = mpsc::channel();
    let th = spawn_poller(session, stop_rx, status_tx);

    let ui_result = run_terminal(&th, &user_tx, &status_rx);
    let session = stop_poller(&stop_tx, th)?;
    ui_result?;
    info!("Session stopped by user");
    Ok(session)
}

/// Poll `session` until told to stop, or until nobody is left to tell it.
fn spawn_poller<D>(
    mut session: Session<D>,
    stop_rx: Receiver<ThreadMessage>,
    status_tx: Sender<SessionStatus>,
) -> JoinHandle<Result<Session<D>>>
where
    D: Device + 'static,
{
    spawn(move || {
        status_tx.send(session.status(RECENT_LINES)).ok();
        loop {
            let n_lines = session.chatter().lines().len();
            session.poll()?;
            if session.chatter().lines().len() != n_lines {
                status_tx.send(session.status(RECENT_LINES)).ok();
            }
            match stop_rx.try_recv() {
                Ok(ThreadMessage::Stop) | Err(TryRecvError::Disconnected) => return Ok(session),
                Err(TryRecvError::Empty) => {}
            }
        }
    })
}

/// Stop and join the poll thread, whatever state the terminal is in.
fn stop_poller<D: Device>(
    stop_tx: &Sender<ThreadMessage>,
    th: JoinHandle<Result<Session<D>>>,
) -> Result<Session<D>> {
    // fails only if the thread already returned
    stop_tx.send(ThreadMessage::Stop).ok();
    th.join().map_err(|_| GuiError::JoinError)?
}

/// Raw mode and the alternate screen are left even if drawing failed. The
/// first error wins.
fn run_terminal<T>(
    th: &JoinHandle<T>,
    user_tx: &Sender<String>,
    status_rx: &Receiver<SessionStatus>,
) -> std::result::Result<(), GuiError> {
    enable_raw_mode()?;
    let entered = stdout().execute(EnterAlternateScreen).map(|_| ());
    let looped = match entered {
        Ok(()) => ui_loop(th, user_tx, status_rx),
        Err(e) => Err(e.into()),
    };
    let raw_off = disable_raw_mode();
    let left = stdout().execute(LeaveAlternateScreen).map(|_| ());
    looped?;
    raw_off?;
    left?;
    Ok(())
}

fn ui_loop<T>(
    th: &JoinHandle<T>,
    user_tx: &Sender<String>,
    status_rx: &Receiver<SessionStatus>,
) -> std::result::Result<(), GuiError> {
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout()))?;
    terminal.clear()?;

    let mut status = None;
    let mut input = String::new();
    while !th.is_finished() {
        if let Some(latest) = status_rx.try_iter().last() {
            status = Some(latest);
        }

        terminal.draw(|frame| draw(frame, status.as_ref(), &input))?;

        if event::poll(Duration::from_millis(16))? {
            if let event::Event::Key(key) = event::read()? {
                if key.kind != KeyEventKind::Press {
                    continue;
                }
                match key.code {
                    KeyCode::Esc => break,
                    KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => break,
                    KeyCode::Char(c) => input.push(c),
                    KeyCode::Backspace => {
                        input.pop();
                    }
                    KeyCode::Enter if !input.trim().is_empty() => {
                        user_tx.send(std::mem::take(&mut input))?;
                    }
                    _ => {}
                }
            }
        }
    }
    Ok(())
}

fn draw(frame: &mut Frame, status: Option<&SessionStatus>, input: &str) {
    let layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(7),
            Constraint::Min(3),
            Constraint::Length(3),
        ])
        .split(frame.size());

    let title = Title::from(" ArduFSM session ".magenta().bold());
    let instructions = Title::from(Line::from(vec![
        " Stop ".into(),
        "<Esc>".magenta().bold(),
        " or ".into(),
        "<Ctrl+C> ".magenta().bold(),
    ]));
    let summary_block = Block::default()
        .title(title.alignment(Alignment::Center))
        .title(
            instructions
                .alignment(Alignment::Center)
                .position(Position::Bottom),
        )
        .borders(Borders::ALL);

    let summary = match status {
        None => vec![Line::from(" Waiting for the device... ")],
        Some(s) => {
            vec![
                Line::from(format!(
                    " Trial {} ({} complete, last released {}) {:?}",
                    s.n_trials, s.n_completed, s.last_released_trial, s.setter_state
                )),
                Line::from(format!(
                    " Scheduler: {} {}",
                    s.scheduler_name, s.scheduler_status
                )),
                Line::from(format!(" {}", s.performance)),
                Line::from(format!(" Logging to {}", s.log_path.display())),
            ]
        }
    };
    frame.render_widget(Paragraph::new(summary).block(summary_block), layout[0]);

    let recent: Vec<ListItem> = status
        .map(|s| s.recent_lines.iter().map(|l| ListItem::new(l.as_str())).collect())
        .unwrap_or_default();
    let recent_block = Block::default()
        .title(" Device ")
        .borders(Borders::ALL);
    frame.render_widget(List::new(recent).block(recent_block), layout[1]);

    let input_block = Block::default()
        .title(" Send to device ")
        .borders(Borders::ALL);
    frame.render_widget(
        Paragraph::new(input).style(Style::default().fg(Color::Magenta)).block(input_block),
        layout[2],
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use crate::dummy_device::DummyDevice;

    fn session(dir: &std::path::Path) -> Session<DummyDevice> {
        let config = SessionConfig {
            logfile: Some(dir.join("ardulines.monitor")),
            ..SessionConfig::simulation()
        };
        Session::with_device(DummyDevice::new(0.9, 1).with_seed(3), &config).unwrap()
    }

    #[test]
    fn poller_hands_the_session_back() {
        let dir = tempfile::tempdir().unwrap();
        let (stop_tx, stop_rx) = mpsc::channel();
        let (status_tx, status_rx) = mpsc::channel();
        let th = spawn_poller(session(dir.path()), stop_rx, status_tx);

        let first = status_rx.recv().unwrap();
        assert_eq!(first.scheduler_name, "auto");

        let mut session = stop_poller(&stop_tx, th).unwrap();
        assert!(!session.chatter().is_closed());
        session.close().unwrap();
    }

    #[test]
    fn poller_stops_when_the_screen_goes_away() {
        let dir = tempfile::tempdir().unwrap();
        let (stop_tx, stop_rx) = mpsc::channel();
        let (status_tx, _status_rx) = mpsc::channel();
        let th = spawn_poller(session(dir.path()), stop_rx, status_tx);

        drop(stop_tx);
        let session = th.join().unwrap().unwrap();
        assert!(!session.chatter().lines().is_empty());
    }
}
