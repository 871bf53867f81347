use crate::session::Event;
use std::path::PathBuf;

/// A line typed at the booth console
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Event(Event),
    ShowLog,
    Help,
    Quit,
}

pub const HELP: &str = "\
commands:
  open              open the camera
  switch            switch between front and back camera
  stop              stop the camera
  hide              simulate the booth going to the background
  roll              spin for a random expression
  snap              take a photo
  save              save the last photo to the output directory
  files <path>...   select image files to upload instead of a photo
  upload            upload the photo or selected files
  reset             clear the photo, files and result
  send <text>       send raw text over the realtime channel
  log               show the last realtime messages
  help              show this help
  quit              exit";

pub fn parse(line: &str) -> Result<Command, String> {
    let line = line.trim();
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };

    let command = match word.to_ascii_lowercase().as_str() {
        "open" => Command::Event(Event::OpenCamera),
        "switch" => Command::Event(Event::SwitchCamera),
        "stop" => Command::Event(Event::StopCamera),
        "hide" => Command::Event(Event::VisibilityHidden),
        "roll" => Command::Event(Event::Roll),
        "snap" | "capture" => Command::Event(Event::Capture),
        "save" => Command::Event(Event::Save),
        "upload" => Command::Event(Event::Upload),
        "reset" => Command::Event(Event::Reset),
        "files" => {
            let paths: Vec<PathBuf> = rest.split_whitespace().map(PathBuf::from).collect();
            if paths.is_empty() {
                return Err("files needs at least one path".to_string());
            }
            Command::Event(Event::SelectFiles(paths))
        }
        "send" => {
            if rest.is_empty() {
                return Err("send needs some text".to_string());
            }
            Command::Event(Event::Send(rest.to_string()))
        }
        "log" => Command::ShowLog,
        "help" | "?" => Command::Help,
        "quit" | "exit" => Command::Quit,
        "" => return Err(String::new()),
        other => return Err(format!("unknown command '{other}', type help")),
    };
    Ok(command)
}
