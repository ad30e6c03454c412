//! `musload boot` — upload one image to a freshly reset target.

use std::io::{IsTerminal, Write};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use colored::Colorize;
use musload::{EchoPolicy, Level, Report, Session, SessionConfig, SessionEvent, StatusEvent};

use crate::OutputFormat;

/// Arguments for `musload boot`.
///
/// Usage: `musload boot [OPTIONS] PORT IMAGE`
#[derive(clap::Args)]
pub struct BootArgs {
    /// Serial device wired to the target (e.g. /dev/ttyUSB0, COM3).
    port: String,

    /// Raw binary image; its size must be a multiple of 4 bytes.
    image: PathBuf,

    /// How long to wait for the target's ready token after asking for a reset.
    #[arg(long, default_value_t = 5000, value_name = "MS")]
    ready_timeout_ms: u64,

    /// How long to wait for the echo of the size frame.
    #[arg(long, default_value_t = 1000, value_name = "MS")]
    size_echo_timeout_ms: u64,

    /// How long to wait for the echo of each image byte.
    #[arg(long, default_value_t = 50, value_name = "MS")]
    byte_echo_timeout_ms: u64,

    /// How long to wait for the port to accept a write.
    #[arg(long, default_value_t = 100, value_name = "MS")]
    write_timeout_ms: u64,

    /// Abort on the first image byte whose echo is missing or wrong.
    ///
    /// By default such bytes are reported and the upload continues.
    #[arg(long)]
    strict_echo: bool,

    /// Output format for the event stream.
    #[arg(long, default_value = "text")]
    format: OutputFormat,
}

impl BootArgs {
    /// Builds the session configuration from the flags.
    fn config(&self) -> SessionConfig {
        let mut config = SessionConfig::default();
        config.timeouts.ready_token = Duration::from_millis(self.ready_timeout_ms);
        config.timeouts.size_echo = Duration::from_millis(self.size_echo_timeout_ms);
        config.timeouts.byte_echo = Duration::from_millis(self.byte_echo_timeout_ms);
        config.timeouts.write = Duration::from_millis(self.write_timeout_ms);
        if self.strict_echo {
            config.echo_policy = EchoPolicy::Strict;
        }
        config
    }

    pub async fn run(self) -> Result<()> {
        let config = self.config();
        let format = self.format;
        tracing::debug!(port = %self.port, image = %self.image.display(), ?config, "starting session");
        let mut handle = Session::new(self.port, self.image).config(config).start()?;

        // Ctrl-C cancels the session; the engine closes the port on its way out.
        let cancel = handle.cancel_token();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });

        let show_progress = matches!(format, OutputFormat::Text) && std::io::stderr().is_terminal();
        while let Some(event) = handle.next_event().await {
            if matches!(format, OutputFormat::Json) {
                println!("{}", serde_json::to_string(&event)?);
            }
            match event {
                SessionEvent::Status(status) if matches!(format, OutputFormat::Text) => {
                    print_status(&status);
                }
                SessionEvent::Progress { sent, total } if show_progress => {
                    print_progress(sent, total);
                }
                SessionEvent::Finished { outcome } => {
                    return match outcome {
                        Ok(report) => {
                            if matches!(format, OutputFormat::Text) {
                                print_report(&report);
                            }
                            Ok(())
                        }
                        Err(failure) => Err(failure.into()),
                    };
                }
                _ => {}
            }
        }
        anyhow::bail!("session ended without a result")
    }
}

fn print_status(status: &StatusEvent) {
    let stamp = format!("[T+{}ms]", status.elapsed.as_millis()).dimmed();
    match status.level {
        Level::Error => println!("{stamp} {} {}", "ERROR:".red().bold(), status.message),
        _ => println!("{stamp} {} {}", "INFO:".green(), status.message),
    }
}

fn print_progress(sent: usize, total: usize) {
    let pct = sent.saturating_mul(100) / total.max(1);
    let mut err = std::io::stderr().lock();
    let _ = write!(err, "\r  {sent}/{total} bytes ({pct}%)");
    if sent == total {
        let _ = writeln!(err);
    }
    let _ = err.flush();
}

fn print_report(report: &Report) {
    let mut line = format!(
        "{} bytes sent in {:.2?}",
        report.bytes_sent, report.elapsed
    );
    if report.echo_errors > 0 {
        line.push_str(&format!(", {} echo errors", report.echo_errors));
    }
    println!("{line}");
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        boot: BootArgs,
    }

    #[test]
    fn defaults_match_library_defaults() {
        let h = Harness::try_parse_from(["boot", "/dev/ttyUSB0", "program.bin"]).unwrap();
        assert_eq!(h.boot.config(), SessionConfig::default());
    }

    #[test]
    fn flags_map_to_config() {
        let h = Harness::try_parse_from([
            "boot",
            "COM3",
            "program.bin",
            "--ready-timeout-ms",
            "250",
            "--byte-echo-timeout-ms",
            "20",
            "--strict-echo",
        ])
        .unwrap();
        let c = h.boot.config();
        assert_eq!(c.timeouts.ready_token, Duration::from_millis(250));
        assert_eq!(c.timeouts.byte_echo, Duration::from_millis(20));
        assert_eq!(c.echo_policy, EchoPolicy::Strict);
    }
}
