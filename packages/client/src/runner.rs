//! Client execution logic.

use std::sync::Arc;

use blather_shared::{
    activity_log::LogReader,
    protocol::{JoinRequest, MESSAGE_LEN, validate_name},
    signal::shutdown_signal,
    transport::{
        ClientChannelPaths, DEFAULT_PERMS, RecordReader, create_fifo, join_channel_path,
        open_fifo_reader, open_fifo_writer, remove_endpoint, write_record,
    },
};
use rustyline::{DefaultEditor, error::ReadlineError};
use tokio::sync::{mpsc, oneshot};

use crate::{
    config::ClientConfig,
    display::{ChatDisplay, StdoutDisplay, TerminalDisplay},
    error::ClientError,
    session::{ClientSession, InputEvent, ServerLink, input_worker, receive_worker},
};

/// Join the server named by `config.service` and chat until the user leaves
/// or the server shuts down.
pub async fn run_client(config: ClientConfig) -> Result<(), ClientError> {
    validate_name(&config.name)?;
    let join_path = join_channel_path(&config.service);
    if !join_path.exists() {
        return Err(ClientError::ServerNotRunning(join_path));
    }

    let paths = ClientChannelPaths::for_id(std::process::id());
    create_fifo(&paths.to_client, DEFAULT_PERMS)?;
    create_fifo(&paths.to_server, DEFAULT_PERMS)?;

    let result = run_session(&config, &paths).await;

    for path in [&paths.to_client, &paths.to_server] {
        if let Err(e) = remove_endpoint(path) {
            tracing::warn!("Failed to remove {}: {}", path.display(), e);
        }
    }
    result
}

async fn run_session(
    config: &ClientConfig,
    paths: &ClientChannelPaths,
) -> Result<(), ClientError> {
    let inbox = RecordReader::new(open_fifo_reader(&paths.to_client)?, MESSAGE_LEN);
    let link = ServerLink::new(open_fifo_writer(&paths.to_server)?);
    let mut join = open_fifo_writer(&join_channel_path(&config.service))?;
    let log = if config.advanced {
        Some(LogReader::open(&config.service)?)
    } else {
        None
    };

    let request = JoinRequest {
        name: config.name.clone(),
        to_client: paths.to_client.display().to_string(),
        to_server: paths.to_server.display().to_string(),
    };
    write_record(&mut join, &request.encode()?).await?;
    tracing::info!("Joined '{}' as '{}'", config.service, config.name);

    let (input_tx, input_rx) = mpsc::unbounded_channel();
    let display = spawn_line_editor(config.prompt(), input_tx).await?;
    let session = Arc::new(ClientSession::new(config.name.clone(), link, display, log));

    let input_task = tokio::spawn(input_worker(session.clone(), input_rx));
    let receive_task = tokio::spawn(receive_worker(session.clone(), inbox));

    tokio::select! {
        (input, receive) = async { tokio::join!(input_task, receive_task) } => {
            input??;
            receive??;
        }
        _ = shutdown_signal() => {
            tracing::info!("'{}' departing on signal", config.name);
            session.depart().await?;
            session.stop();
        }
    }

    Ok(())
}

/// Run the blocking line editor on its own thread.
///
/// Lines are forwarded to `input_tx`. Returns the display both workers print
/// through: the editor's external printer when a terminal is attached,
/// stdout otherwise.
async fn spawn_line_editor(
    prompt: String,
    input_tx: mpsc::UnboundedSender<InputEvent>,
) -> Result<Arc<dyn ChatDisplay>, ClientError> {
    let (printer_tx, printer_rx) = oneshot::channel();

    std::thread::spawn(move || {
        let mut rl = match DefaultEditor::new() {
            Ok(rl) => rl,
            Err(e) => {
                let _ = printer_tx.send(Err(e));
                return;
            }
        };
        let printer = rl.create_external_printer().ok();
        if printer_tx.send(Ok(printer)).is_err() {
            return;
        }

        loop {
            let event = match rl.readline(&prompt) {
                Ok(line) => {
                    if !line.trim().is_empty() {
                        rl.add_history_entry(line.as_str()).ok();
                    }
                    InputEvent::Line(line)
                }
                Err(ReadlineError::Interrupted) => {
                    tracing::info!("Interrupted");
                    InputEvent::Interrupted
                }
                Err(ReadlineError::Eof) => {
                    tracing::info!("EOF");
                    InputEvent::Eof
                }
                Err(err) => {
                    tracing::error!("Readline error: {}", err);
                    InputEvent::Eof
                }
            };
            let last = !matches!(event, InputEvent::Line(_));
            if input_tx.send(event).is_err() || last {
                break;
            }
        }
    });

    match printer_rx.await {
        Ok(Ok(Some(printer))) => Ok(Arc::new(TerminalDisplay::new(printer))),
        Ok(Ok(None)) => Ok(Arc::new(StdoutDisplay::new())),
        Ok(Err(e)) => Err(ClientError::Readline(e.to_string())),
        Err(_) => Err(ClientError::Readline("line editor thread exited".to_string())),
    }
}
