//! The `talk` command: a terminal client for one agent.
//!
//! Enter toggles recording, `r` reconnects, `q` quits. With `--once` the input is
//! recorded and sent immediately and the command exits when the reply is complete.

use crate::client::microphone::FileMicrophone;
use crate::client::{
    AudioSink, ClientEvent, ClientOptions, ClientState, DirectorySink, Microphone, NullSink,
    ToggleOutcome, VoiceClient,
};
use crate::config::ClientConfig;
use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const PUMP_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone)]
pub struct TalkOptions {
    pub agent: String,
    /// Audio file to send instead of the live microphone.
    pub input: Option<PathBuf>,
    /// Named capture device; the system default when unset.
    pub device: Option<String>,
    /// Directory for reply audio. Replies are discarded when unset.
    pub output: Option<PathBuf>,
    pub once: bool,
}

fn select_microphone(input: Option<&PathBuf>, device: Option<&str>) -> Result<Box<dyn Microphone>> {
    if let Some(path) = input {
        if device.is_some() {
            bail!("--device and --input cannot be combined");
        }
        return Ok(Box::new(FileMicrophone::new(path)));
    }

    #[cfg(feature = "microphone")]
    return Ok(Box::new(crate::client::microphone::CpalMicrophone::new(
        device.map(str::to_string),
    )));

    #[cfg(not(feature = "microphone"))]
    bail!("no --input file given and this build has no microphone support (enable the `microphone` feature)");
}

async fn next_command(lines: &mut Option<Lines<BufReader<Stdin>>>) -> std::io::Result<Option<String>> {
    match lines {
        Some(lines) => lines.next_line().await,
        None => std::future::pending().await,
    }
}

pub async fn run_talk(config: &ClientConfig, options: TalkOptions) -> Result<()> {
    if options.once && options.input.is_none() {
        bail!("--once needs an --input file");
    }

    let microphone = select_microphone(options.input.as_ref(), options.device.as_deref())?;
    let playback: Box<dyn AudioSink> = match &options.output {
        Some(dir) => Box::new(
            DirectorySink::new(dir)
                .with_context(|| format!("cannot create output directory {}", dir.display()))?,
        ),
        None => Box::new(NullSink::default()),
    };

    let (mut client, mut events) = VoiceClient::new(
        ClientOptions::from_config(config, &options.agent),
        microphone,
        playback,
    );

    let mut printed = 0;
    let connected = client.connect(CONNECT_TIMEOUT).await;
    print_new(&client, &mut printed);
    connected.context("could not open the session")?;

    let mut stdin = if options.once {
        None
    } else {
        println!("Press Enter to start/stop recording, 'r' to reconnect, 'q' to quit.");
        Some(BufReader::new(tokio::io::stdin()).lines())
    };

    let mut sent = false;
    if options.once {
        client.toggle_record();
        client.pump_recording();
        sent = matches!(client.toggle_record(), ToggleOutcome::Sent { .. });
        if !sent {
            print_new(&client, &mut printed);
            bail!("nothing was sent");
        }
    }

    let mut tick = tokio::time::interval(PUMP_INTERVAL);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => {
                    let exhausted = matches!(event, ClientEvent::ReconnectExhausted { .. });
                    client.handle_event(event);
                    if exhausted && options.once {
                        break;
                    }
                }
                None => break,
            },
            line = next_command(&mut stdin) => match line? {
                Some(line) => match line.trim() {
                    "q" | "quit" => break,
                    "r" => client.reconnect().await,
                    _ => {
                        if let ToggleOutcome::Sent { .. } = client.toggle_record() {
                            sent = true;
                        }
                    }
                },
                None => break,
            },
            _ = tick.tick() => {
                client.pump_recording();
            }
            _ = &mut ctrl_c => break,
        }

        print_new(&client, &mut printed);

        if options.once && sent && !client.is_awaiting_reply() && client.state() == ClientState::Idle {
            break;
        }
    }

    client.shutdown().await;
    print_new(&client, &mut printed);
    Ok(())
}

fn print_new<M: Microphone, P: AudioSink>(client: &VoiceClient<M, P>, printed: &mut usize) {
    for entry in client.log().since(*printed) {
        println!("{}", entry);
    }
    *printed = client.log().len();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_and_input_are_exclusive() {
        let input = PathBuf::from("question.wav");
        let err = select_microphone(Some(&input), Some("USB Audio")).err().unwrap();
        assert!(err.to_string().contains("--device"));
        assert!(select_microphone(Some(&input), None).is_ok());
    }
}
