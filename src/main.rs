//! vmdash-term - attach one terminal session to stdin/stdout.
//!
//! ```text
//! vmdash-term <ws-url> [--config <path>] [--monitor]
//! ```
//!
//! Lines read from stdin are sent as input; shell output is written to
//! stdout. EOF on stdin closes the session.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{error, info};

use vmdash_terminal::config::ConfigStorage;
use vmdash_terminal::session::{ConnectionStatus, Geometry, LeakMonitor, SessionManager};
use vmdash_terminal::transport::WebSocketConnector;
use vmdash_terminal::widget::{
    Container, HostContainer, TerminalWidget, WidgetError, WidgetEventSender, WidgetFactory,
};

#[derive(Parser, Debug)]
#[command(name = "vmdash-term", version)]
#[command(about = "Attach one terminal session to stdin/stdout")]
struct Cli {
    /// Terminal stream endpoint (e.g., ws://localhost:8080/terminal)
    url: String,

    /// Config file (defaults to ~/.vmdash/terminal.json)
    #[arg(long, env = "VMDASH_TERMINAL_CONFIG")]
    config: Option<PathBuf>,

    /// Run the leak monitor alongside the session
    #[arg(long)]
    monitor: bool,
}

/// Widget that renders into the process's stdout
struct StdoutWidget {
    out: mpsc::UnboundedSender<String>,
    geometry: Geometry,
}

impl TerminalWidget for StdoutWidget {
    fn open(&mut self, container: &dyn Container) {
        info!("Rendering into {}", container.key());
    }

    fn write(&mut self, chunk: &str) {
        let _ = self.out.send(chunk.to_string());
    }

    fn clear(&mut self) {
        let _ = self.out.send("\x1b[2J\x1b[H".to_string());
    }

    fn dispose(&mut self) -> Result<(), WidgetError> {
        Ok(())
    }

    fn fit(&mut self) -> Option<Geometry> {
        Some(self.geometry)
    }

    fn focus(&mut self) {}

    fn has_selection(&self) -> bool {
        false
    }

    fn get_selection(&self) -> Option<String> {
        None
    }

    fn scroll_to_top(&mut self) {}

    fn scroll_to_bottom(&mut self) {}
}

struct StdoutWidgetFactory {
    out: mpsc::UnboundedSender<String>,
    geometry: Geometry,
}

impl WidgetFactory for StdoutWidgetFactory {
    fn create(
        &self,
        _session_id: &str,
        _events: WidgetEventSender,
    ) -> Result<Box<dyn TerminalWidget>, WidgetError> {
        Ok(Box::new(StdoutWidget {
            out: self.out.clone(),
            geometry: self.geometry,
        }))
    }
}

#[tokio::main]
async fn main() {
    vmdash_terminal::init_logging();

    let args = Cli::parse();

    let storage = match args.config {
        Some(path) => ConfigStorage::with_path(path),
        None => match ConfigStorage::new() {
            Ok(storage) => storage,
            Err(e) => {
                error!("{}", e);
                std::process::exit(1);
            }
        },
    };
    let config = match storage.load().await {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load {:?}: {}", storage.path(), e);
            std::process::exit(1);
        }
    };

    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(chunk) = out_rx.recv().await {
            if stdout.write_all(chunk.as_bytes()).await.is_err() {
                break;
            }
            let _ = stdout.flush().await;
        }
    });

    let connector = WebSocketConnector::new(args.url.as_str())
        .with_event_capacity(config.event_channel_capacity);
    let widgets = StdoutWidgetFactory {
        out: out_tx,
        geometry: config.default_geometry(),
    };
    let monitor_interval = config.monitor.interval();
    let manager = SessionManager::new(config, Arc::new(connector), Arc::new(widgets));

    let monitor = LeakMonitor::new(manager.clone());
    if args.monitor {
        monitor.start_monitoring(monitor_interval, None);
    }

    let session_id = match manager.create_session(None) {
        Ok(id) => id,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };
    manager.attach(&session_id, HostContainer::new("stdout")).await;

    let status = manager.session(&session_id).map(|s| s.status);
    if status != Some(ConnectionStatus::Connected) {
        let reason = manager
            .session(&session_id)
            .and_then(|s| s.last_error)
            .unwrap_or_else(|| "unknown error".to_string());
        error!("Could not connect to {}: {}", args.url, reason);
        manager.dispose();
        std::process::exit(1);
    }

    let mut feed = manager.subscribe();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    manager.send_input(&session_id, &format!("{}\r", line));
                }
                Ok(None) | Err(_) => break,
            },
            changed = feed.changed() => {
                if changed.is_err() {
                    break;
                }
                let disconnected = feed
                    .borrow_and_update()
                    .session(&session_id)
                    .map(|s| s.status == ConnectionStatus::Disconnected)
                    .unwrap_or(true);
                if disconnected {
                    info!("Session {} disconnected", session_id);
                    break;
                }
            }
        }
    }

    monitor.stop_monitoring();
    manager.close(&session_id);
    drop(manager);
    drop(monitor);
    let _ = writer.await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_cli_parses_options() {
        let cli = Cli::try_parse_from([
            "vmdash-term",
            "ws://127.0.0.1:9000/terminal",
            "--config",
            "/tmp/terminal.json",
            "--monitor",
        ])
        .unwrap();
        assert_eq!(cli.url, "ws://127.0.0.1:9000/terminal");
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/terminal.json")));
        assert!(cli.monitor);

        assert!(Cli::try_parse_from(["vmdash-term"]).is_err());
        assert!(Cli::try_parse_from(["vmdash-term", "ws://a", "ws://b"]).is_err());
    }
}
