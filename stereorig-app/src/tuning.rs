//! Tuning keys from a byte stream.
//!
//! Each byte that maps to a [`TuningCommand`] is forwarded to the loop over a
//! channel; everything else (including newlines) is ignored.

use std::io::{self, Read};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;

use stereorig_match::TuningCommand;
use tracing::{debug, warn};

/// Forward commands until `input` ends or the receiver is gone.
///
/// Returns how many commands were sent.
pub fn forward_commands<R: Read>(input: R, commands: &Sender<TuningCommand>) -> usize {
    let mut sent = 0;
    for byte in input.bytes() {
        let byte = match byte {
            Ok(byte) => byte,
            Err(e) => {
                warn!("Tuning input failed: {}", e);
                break;
            }
        };

        let Some(command) = TuningCommand::from_key(byte as char) else {
            continue;
        };
        if commands.send(command).is_err() {
            break;
        }
        sent += 1;
        if command == TuningCommand::Quit {
            break;
        }
    }
    sent
}

/// Read tuning keys from stdin on a background thread.
pub fn spawn_stdin_reader() -> io::Result<Receiver<TuningCommand>> {
    let (sender, receiver) = mpsc::channel();
    thread::Builder::new()
        .name("tuning-input".to_string())
        .spawn(move || {
            let sent = forward_commands(io::stdin().lock(), &sender);
            debug!("Tuning input closed after {} commands", sent);
        })?;
    Ok(receiver)
}
