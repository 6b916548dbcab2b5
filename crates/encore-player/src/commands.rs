//! Line commands read from stdin

use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use encore_core::engine::PlaybackEngine;
use encore_core::{ProviderId, TrackRef};

use crate::library::LocalLibrary;

pub const HELP: &str = "\
Commands:
  list                    show the library
  play [index]            resume, or start the queue entry at index
  pause | toggle | stop
  next | prev
  seek <seconds>
  queue <id|all> [top]    append tracks (or put them first)
  playnext <id>           insert after the current track
  remove <index> | clear
  repeat <on|off>         shuffle <on|off>
  dsp <id,id,..|off>      set the effect chain (available: gain, mono)
  sleep <minutes|off>
  status
  quit";

#[derive(Debug, Clone, PartialEq)]
pub enum PlayerCommand {
    List,
    Play(Option<usize>),
    Pause,
    Toggle,
    Stop,
    Next,
    Previous,
    Seek(Duration),
    Queue { target: QueueTarget, top: bool },
    PlayNext(String),
    Remove(usize),
    Clear,
    Repeat(bool),
    Shuffle(bool),
    Dsp(Vec<ProviderId>),
    Sleep(Option<Duration>),
    Status,
    Help,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueTarget {
    All,
    Track(String),
}

/// What the input loop should do next
#[derive(Debug, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

/// Parse one input line. Blank lines yield `None`.
pub fn parse(line: &str) -> Result<Option<PlayerCommand>> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Ok(None);
    };
    let arg = words.next();

    let command = match verb.to_ascii_lowercase().as_str() {
        "list" | "ls" => PlayerCommand::List,
        "play" => PlayerCommand::Play(arg.map(parse_index).transpose()?),
        "pause" => PlayerCommand::Pause,
        "toggle" => PlayerCommand::Toggle,
        "stop" => PlayerCommand::Stop,
        "next" => PlayerCommand::Next,
        "prev" | "previous" => PlayerCommand::Previous,
        "seek" => {
            let seconds: f64 = required(arg, "seek <seconds>")?
                .parse()
                .context("seek expects a number of seconds")?;
            if !seconds.is_finite() || seconds < 0.0 {
                bail!("seek position must be positive");
            }
            PlayerCommand::Seek(Duration::from_secs_f64(seconds))
        }
        "queue" => {
            let target = match required(arg, "queue <id|all> [top]")? {
                "all" => QueueTarget::All,
                id => QueueTarget::Track(id.to_string()),
            };
            let top = matches!(words.next(), Some("top"));
            PlayerCommand::Queue { target, top }
        }
        "playnext" => PlayerCommand::PlayNext(required(arg, "playnext <id>")?.to_string()),
        "remove" | "rm" => PlayerCommand::Remove(parse_index(required(arg, "remove <index>")?)?),
        "clear" => PlayerCommand::Clear,
        "repeat" => PlayerCommand::Repeat(parse_switch(arg)?),
        "shuffle" => PlayerCommand::Shuffle(parse_switch(arg)?),
        "dsp" => match required(arg, "dsp <id,id,..|off>")? {
            "off" | "none" => PlayerCommand::Dsp(Vec::new()),
            list => PlayerCommand::Dsp(
                list.split(',')
                    .filter(|id| !id.is_empty())
                    .map(ProviderId::new)
                    .collect(),
            ),
        },
        "sleep" => match required(arg, "sleep <minutes|off>")? {
            "off" => PlayerCommand::Sleep(None),
            minutes => {
                let minutes: u64 = minutes.parse().context("sleep expects whole minutes")?;
                PlayerCommand::Sleep(Some(Duration::from_secs(minutes * 60)))
            }
        },
        "status" | "st" => PlayerCommand::Status,
        "help" | "?" => PlayerCommand::Help,
        "quit" | "exit" | "q" => PlayerCommand::Quit,
        other => bail!("unknown command '{}', try 'help'", other),
    };
    Ok(Some(command))
}

fn required<'a>(arg: Option<&'a str>, usage: &str) -> Result<&'a str> {
    arg.with_context(|| format!("usage: {}", usage))
}

fn parse_index(arg: &str) -> Result<usize> {
    arg.parse()
        .with_context(|| format!("'{}' is not a queue index", arg))
}

fn parse_switch(arg: Option<&str>) -> Result<bool> {
    match arg {
        Some("on") | Some("true") | Some("1") => Ok(true),
        Some("off") | Some("false") | Some("0") => Ok(false),
        _ => bail!("expected 'on' or 'off'"),
    }
}

/// Run a parsed command against the engine
pub fn execute(
    command: PlayerCommand,
    engine: &PlaybackEngine,
    library: &LocalLibrary,
) -> Result<Flow> {
    match command {
        PlayerCommand::List => {
            for (i, track) in library.tracks().enumerate() {
                println!(
                    "{:>3}  {:<32} {}",
                    i,
                    track.track.track_id,
                    format_ms(track.duration_ms)
                );
            }
        }
        PlayerCommand::Play(None) => engine.play()?,
        PlayerCommand::Play(Some(index)) => engine.play_at_index(index)?,
        PlayerCommand::Pause => engine.pause()?,
        PlayerCommand::Toggle => engine.toggle_play_pause()?,
        PlayerCommand::Stop => engine.stop()?,
        PlayerCommand::Next => engine.next()?,
        PlayerCommand::Previous => engine.previous()?,
        PlayerCommand::Seek(position) => engine.seek(position.as_millis() as u64)?,
        PlayerCommand::Queue { target, top } => match target {
            QueueTarget::All => engine.queue_album(library.as_album(), top)?,
            QueueTarget::Track(id) => engine.queue_song(local_track(library, &id)?, top)?,
        },
        PlayerCommand::PlayNext(id) => engine.play_next(local_track(library, &id)?)?,
        PlayerCommand::Remove(index) => engine.remove_from_queue(index)?,
        PlayerCommand::Clear => engine.clear_queue()?,
        PlayerCommand::Repeat(on) => engine.set_repeat(on)?,
        PlayerCommand::Shuffle(on) => engine.set_shuffle(on)?,
        PlayerCommand::Dsp(chain) => {
            engine.set_active_chain(&chain);
            let active = engine.active_chain();
            if active.is_empty() {
                println!("DSP chain off");
            } else {
                let names: Vec<_> = active.iter().map(|id| id.as_str()).collect();
                println!("DSP chain: {}", names.join(" -> "));
            }
        }
        PlayerCommand::Sleep(delay) => engine.set_sleep_timer(delay.map(|d| Instant::now() + d)),
        PlayerCommand::Status => {
            engine.sync()?;
            println!("{}", status_line(engine));
        }
        PlayerCommand::Help => println!("{}", HELP),
        PlayerCommand::Quit => return Ok(Flow::Quit),
    }
    Ok(Flow::Continue)
}

fn local_track(library: &LocalLibrary, id: &str) -> Result<TrackRef> {
    match library.get(id) {
        Some(track) => Ok(track.track.clone()),
        None => bail!("no track '{}' in the library", id),
    }
}

/// One-line summary of the engine state
pub fn status_line(engine: &PlaybackEngine) -> String {
    let queue = engine.queue();
    let current = match (engine.current_index(), engine.current_track()) {
        (Some(index), Some(track)) => format!("[{}/{}] {}", index + 1, queue.len(), track),
        _ => format!("[-/{}] nothing", queue.len()),
    };
    let mut modes = Vec::new();
    if engine.is_repeat() {
        modes.push("repeat");
    }
    if engine.is_shuffle() {
        modes.push("shuffle");
    }
    if engine.sleep_timer().is_some() {
        modes.push("sleep");
    }
    let diagnostics = engine.diagnostics();

    format!(
        "{:?} {} at {}{}{} (dropouts: {})",
        engine.state(),
        current,
        format_ms(engine.position_ms()),
        if modes.is_empty() { "" } else { " | " },
        modes.join(" "),
        diagnostics.dropouts,
    )
}

fn format_ms(ms: u64) -> String {
    let seconds = ms / 1000;
    format!("{}:{:02}", seconds / 60, seconds % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parsed(line: &str) -> PlayerCommand {
        parse(line).unwrap().unwrap()
    }

    #[test]
    fn test_parse_transport() {
        assert_eq!(parse("   ").unwrap(), None);
        assert_eq!(parsed("play"), PlayerCommand::Play(None));
        assert_eq!(parsed("PLAY 3"), PlayerCommand::Play(Some(3)));
        assert_eq!(parsed("prev"), PlayerCommand::Previous);
        assert_eq!(parsed("seek 1.5"), PlayerCommand::Seek(Duration::from_millis(1500)));
        assert_eq!(parsed("q"), PlayerCommand::Quit);
    }

    #[test]
    fn test_parse_queue_and_modes() {
        assert_eq!(
            parsed("queue all top"),
            PlayerCommand::Queue {
                target: QueueTarget::All,
                top: true
            }
        );
        assert_eq!(
            parsed("queue intro"),
            PlayerCommand::Queue {
                target: QueueTarget::Track("intro".into()),
                top: false
            }
        );
        assert_eq!(parsed("repeat on"), PlayerCommand::Repeat(true));
        assert_eq!(parsed("shuffle off"), PlayerCommand::Shuffle(false));
        assert_eq!(
            parsed("dsp mono,gain"),
            PlayerCommand::Dsp(vec![ProviderId::new("mono"), ProviderId::new("gain")])
        );
        assert_eq!(parsed("dsp off"), PlayerCommand::Dsp(vec![]));
        assert_eq!(
            parsed("sleep 15"),
            PlayerCommand::Sleep(Some(Duration::from_secs(900)))
        );
        assert_eq!(parsed("sleep off"), PlayerCommand::Sleep(None));
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse("dance").is_err());
        assert!(parse("seek").is_err());
        assert!(parse("seek -4").is_err());
        assert!(parse("remove x").is_err());
        assert!(parse("repeat maybe").is_err());
    }

    #[test]
    fn test_format_ms() {
        assert_eq!(format_ms(0), "0:00");
        assert_eq!(format_ms(61_999), "1:01");
        assert_eq!(format_ms(3_600_000), "60:00");
    }
}
