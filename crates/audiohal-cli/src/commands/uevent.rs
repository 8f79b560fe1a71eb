//! Uevent emulation client.
//!
//! Sends a single event byte to the abstract-namespace socket a HAL under
//! test listens on. Connection and value problems are reported but do not
//! fail the command; only a wrong argument count does.

use clap::Args;

const RECOVER: u8 = 8;
const CRASH: u8 = 9;

/// Send a uevent to the emulation socket.
#[derive(Args)]
pub struct UeventArgs {
    /// Event to send: RECOVER or CRASH
    #[arg(num_args = 0..)]
    pub message: Vec<String>,

    /// Abstract socket name
    #[arg(long, default_value = "uevent_emulation")]
    pub socket: String,
}

fn event_byte(message: &str) -> Option<u8> {
    match message {
        "RECOVER" => Some(RECOVER),
        "CRASH" => Some(CRASH),
        _ => None,
    }
}

/// Run the uevent command.
pub fn run(args: UeventArgs) -> anyhow::Result<()> {
    let [message] = args.message.as_slice() else {
        eprintln!("usage: audiohal uevent <uevent message>");
        eprintln!("  uevent message:");
        eprintln!("    RECOVER or CRASH");
        std::process::exit(1);
    };
    send(&args.socket, message)
}

#[cfg(target_os = "linux")]
fn send(socket: &str, message: &str) -> anyhow::Result<()> {
    use std::io::Write;
    use std::os::linux::net::SocketAddrExt;
    use std::os::unix::net::{SocketAddr, UnixStream};

    let connected = SocketAddr::from_abstract_name(socket.as_bytes())
        .and_then(|addr| UnixStream::connect_addr(&addr));
    let mut stream = match connected {
        Ok(stream) => stream,
        Err(e) => {
            eprintln!("connection failed: {e}");
            return Ok(());
        }
    };

    let Some(byte) = event_byte(message) else {
        eprintln!("send only RECOVER or CRASH");
        return Ok(());
    };
    if let Err(e) = stream.write_all(&[byte]) {
        tracing::warn!("uevent: send to '{socket}' failed: {e}");
        return Ok(());
    }
    tracing::debug!("uevent: sent {message} ({byte}) to '{socket}'");
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn send(_socket: &str, message: &str) -> anyhow::Result<()> {
    if event_byte(message).is_none() {
        eprintln!("send only RECOVER or CRASH");
        return Ok(());
    }
    anyhow::bail!("abstract-namespace sockets are only available on Linux")
}
