//! The two client workers and what they share.
//!
//! The input worker turns lines typed by the user into messages or local
//! log queries. The receive worker renders what the server sends and answers
//! its pings. Either one stopping tells the other to stop through a shared
//! watch channel.

use std::sync::Arc;

use blather_shared::{
    activity_log::{LogError, LogReader},
    protocol::{Message, MessageKind, truncate_body},
    transport::{BoxWriter, RecordReader, TransportError, write_record},
};
use tokio::sync::{Mutex, mpsc, watch};

use crate::{
    display::ChatDisplay,
    domain::{Command, parse_command},
    error::ClientError,
    formatter::MessageFormatter,
};

/// What the line editor thread reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputEvent {
    Line(String),
    /// Ctrl+D
    Eof,
    /// Ctrl+C
    Interrupted,
}

/// The to-server channel, shared by both workers.
pub struct ServerLink {
    writer: Mutex<BoxWriter>,
}

impl ServerLink {
    pub fn new(writer: BoxWriter) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub async fn send(&self, message: &Message) -> Result<(), ClientError> {
        let record = message.encode()?;
        let mut writer = self.writer.lock().await;
        write_record(&mut writer, &record).await?;
        Ok(())
    }
}

/// State shared by the input and receive workers.
pub struct ClientSession {
    pub name: String,
    pub link: ServerLink,
    pub display: Arc<dyn ChatDisplay>,
    /// Present when the advanced commands are enabled
    pub log: Option<LogReader>,
    shutdown: watch::Sender<bool>,
}

impl ClientSession {
    pub fn new(
        name: impl Into<String>,
        link: ServerLink,
        display: Arc<dyn ChatDisplay>,
        log: Option<LogReader>,
    ) -> Self {
        Self {
            name: name.into(),
            link,
            display,
            log,
            shutdown: watch::Sender::new(false),
        }
    }

    /// Ask both workers to stop.
    pub fn stop(&self) {
        self.shutdown.send_replace(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Tell the server this client is leaving.
    pub async fn depart(&self) -> Result<(), ClientError> {
        self.link.send(&Message::departed(self.name.clone())).await
    }

    async fn stopped(&self) {
        let mut shutdown = self.shutdown.subscribe();
        // The sender lives in `self`, so this only returns once stopped.
        let _ = shutdown.wait_for(|stopped| *stopped).await;
    }
}

/// Read user input until end of input or until the session stops.
pub async fn input_worker(
    session: Arc<ClientSession>,
    mut input_rx: mpsc::UnboundedReceiver<InputEvent>,
) -> Result<(), ClientError> {
    let advanced = session.log.is_some();
    loop {
        let event = tokio::select! {
            _ = session.stopped() => return Ok(()),
            event = input_rx.recv() => event.unwrap_or(InputEvent::Eof),
        };

        match event {
            InputEvent::Line(line) => match parse_command(&line, advanced) {
                Command::Say(text) => {
                    if text.trim().is_empty() {
                        continue;
                    }
                    let body = truncate_body(&text);
                    if let Err(e) = session
                        .link
                        .send(&Message::mesg(session.name.clone(), body))
                        .await
                    {
                        session.stop();
                        return Err(e);
                    }
                }
                Command::Who => show_who(&session).await,
                Command::Last(n) => show_last(&session, n).await,
                Command::Usage(usage) => session.display.show(usage),
            },
            InputEvent::Eof | InputEvent::Interrupted => {
                if event == InputEvent::Eof {
                    session
                        .display
                        .show(&MessageFormatter::format_end_of_input());
                }
                tracing::info!("'{}' departing", session.name);
                let departed = session.depart().await;
                session.stop();
                return departed;
            }
        }
    }
}

/// Run a query against the activity log on the blocking pool.
///
/// Reading the snapshot waits on the log semaphore, which the server holds
/// while rewriting it. `None` when the advanced commands are off.
async fn query_log<T, F>(
    session: &Arc<ClientSession>,
    query: F,
) -> Option<Result<T, ClientError>>
where
    T: Send + 'static,
    F: FnOnce(&LogReader) -> Result<T, LogError> + Send + 'static,
{
    session.log.as_ref()?;
    let owner = session.clone();
    match tokio::task::spawn_blocking(move || owner.log.as_ref().map(query)).await {
        Ok(result) => result.map(|result| result.map_err(ClientError::from)),
        Err(e) => Some(Err(e.into())),
    }
}

async fn show_who(session: &Arc<ClientSession>) {
    match query_log(session, |log| log.who()).await {
        Some(Ok(who)) => session.display.show(&MessageFormatter::format_who(&who)),
        Some(Err(e)) => tracing::warn!("Failed to read who snapshot: {}", e),
        None => {}
    }
}

async fn show_last(session: &Arc<ClientSession>, n: usize) {
    match query_log(session, move |log| log.last(n)).await {
        Some(Ok(messages)) => session
            .display
            .show(&MessageFormatter::format_last(&messages)),
        Some(Err(e)) => tracing::warn!("Failed to read last {} messages: {}", n, e),
        None => {}
    }
}

/// Render messages from the server until it shuts down or the session stops.
pub async fn receive_worker(
    session: Arc<ClientSession>,
    mut inbox: RecordReader,
) -> Result<(), ClientError> {
    loop {
        let record = tokio::select! {
            _ = session.stopped() => return Ok(()),
            record = inbox.next_record() => record,
        };
        let record = match record {
            Ok(record) => record,
            Err(TransportError::Closed) => {
                tracing::warn!("Server closed the connection");
                session.stop();
                return Err(TransportError::Closed.into());
            }
            Err(e) => {
                session.stop();
                return Err(e.into());
            }
        };

        let message = match Message::decode(&record) {
            Ok(message) => message,
            Err(e) => {
                tracing::debug!("Ignoring record from server: {}", e);
                continue;
            }
        };
        match message.kind {
            MessageKind::Ping => {
                if let Err(e) = session.link.send(&Message::ping(session.name.clone())).await {
                    session.stop();
                    return Err(e);
                }
            }
            MessageKind::Shutdown => {
                session
                    .display
                    .show(&MessageFormatter::format_shutdown());
                session.stop();
                return Ok(());
            }
            _ => {
                if let Some(text) = MessageFormatter::format_message(&message) {
                    session.display.show(&text);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::MemoryDisplay;
    use blather_shared::{
        activity_log::{LogFile, WhoSnapshot, log_path, semaphore_name},
        protocol::{BODY_LEN, MESSAGE_LEN},
        semaphore::NamedSemaphore,
    };
    use tokio::io::{AsyncWriteExt, DuplexStream, duplex};

    fn session_with(
        log: Option<LogReader>,
    ) -> (Arc<ClientSession>, Arc<MemoryDisplay>, RecordReader) {
        let (client_end, server_end) = duplex(64 * 1024);
        let display = Arc::new(MemoryDisplay::default());
        let session = Arc::new(ClientSession::new(
            "alice",
            ServerLink::new(Box::pin(client_end)),
            display.clone(),
            log,
        ));
        (
            session,
            display,
            RecordReader::new(Box::pin(server_end), MESSAGE_LEN),
        )
    }

    async fn next_message(to_server: &mut RecordReader) -> Message {
        Message::decode(&to_server.next_record().await.unwrap()).unwrap()
    }

    async fn push(inbox: &mut DuplexStream, message: Message) {
        inbox.write_all(&message.encode().unwrap()).await.unwrap();
    }

    #[tokio::test]
    async fn test_lines_are_sent_and_eof_departs() {
        // テスト項目: 入力行は MESG として送られ、入力終了で DEPARTED が送られる
        // given (前提条件):
        let (session, display, mut to_server) = session_with(None);
        let (input_tx, input_rx) = mpsc::unbounded_channel();
        input_tx.send(InputEvent::Line("hi all".to_string())).unwrap();
        input_tx.send(InputEvent::Eof).unwrap();

        // when (操作):
        input_worker(session.clone(), input_rx).await.unwrap();

        // then (期待する結果):
        assert_eq!(
            next_message(&mut to_server).await,
            Message::mesg("alice", "hi all")
        );
        assert_eq!(
            next_message(&mut to_server).await,
            Message::departed("alice")
        );
        assert_eq!(display.lines(), vec!["End of Input, Departing"]);
        assert!(session.is_stopped());
    }

    #[tokio::test]
    async fn test_long_line_is_truncated() {
        // テスト項目: 本文の上限を超える入力は切り詰めて送られる
        // given (前提条件):
        let (session, _display, mut to_server) = session_with(None);
        let (input_tx, input_rx) = mpsc::unbounded_channel();
        input_tx
            .send(InputEvent::Line("x".repeat(BODY_LEN * 2)))
            .unwrap();
        input_tx.send(InputEvent::Interrupted).unwrap();

        // when (操作):
        input_worker(session, input_rx).await.unwrap();

        // then (期待する結果):
        let message = next_message(&mut to_server).await;
        assert_eq!(message.body.len(), BODY_LEN - 1);
        assert_eq!(
            next_message(&mut to_server).await,
            Message::departed("alice")
        );
    }

    #[tokio::test]
    async fn test_commands_are_plain_text_without_log() {
        // テスト項目: ログがない場合 %who は通常のメッセージとして送られる
        // given (前提条件):
        let (session, _display, mut to_server) = session_with(None);
        let (input_tx, input_rx) = mpsc::unbounded_channel();
        input_tx.send(InputEvent::Line("%who".to_string())).unwrap();
        drop(input_tx);

        // when (操作):
        input_worker(session, input_rx).await.unwrap();

        // then (期待する結果):
        assert_eq!(
            next_message(&mut to_server).await,
            Message::mesg("alice", "%who")
        );
    }

    #[tokio::test]
    async fn test_receive_renders_and_answers_ping() {
        // テスト項目: 受信したメッセージが表示され、PING には自分の名前で応答する
        // given (前提条件):
        let (session, display, mut to_server) = session_with(None);
        let (mut server, client) = duplex(64 * 1024);
        push(&mut server, Message::joined("bob")).await;
        push(&mut server, Message::mesg("bob", "hello")).await;
        push(&mut server, Message::ping("lobby")).await;
        push(&mut server, Message::shutdown()).await;

        // when (操作):
        receive_worker(
            session.clone(),
            RecordReader::new(Box::pin(client), MESSAGE_LEN),
        )
        .await
        .unwrap();

        // then (期待する結果):
        assert_eq!(
            display.lines(),
            vec![
                "-- bob JOINED --",
                "[bob]: hello",
                "!!! server is shutting down !!!",
            ]
        );
        assert_eq!(next_message(&mut to_server).await, Message::ping("alice"));
        assert!(session.is_stopped());
    }

    #[tokio::test]
    async fn test_shutdown_stops_input_worker() {
        // テスト項目: サーバーのシャットダウンを受けると入力ワーカーも終了する
        // given (前提条件):
        let (session, _display, _to_server) = session_with(None);
        let (_input_tx, input_rx) = mpsc::unbounded_channel();
        let input = tokio::spawn(input_worker(session.clone(), input_rx));
        let (mut server, client) = duplex(64 * 1024);
        push(&mut server, Message::shutdown()).await;

        // when (操作):
        receive_worker(
            session.clone(),
            RecordReader::new(Box::pin(client), MESSAGE_LEN),
        )
        .await
        .unwrap();

        // then (期待する結果):
        assert!(input.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_closed_server_channel_stops_session() {
        // テスト項目: サーバーからのチャンネルが閉じられるとエラーで終了する
        // given (前提条件):
        let (session, _display, _to_server) = session_with(None);
        let (server, client) = duplex(64);
        drop(server);

        // when (操作):
        let result = receive_worker(
            session.clone(),
            RecordReader::new(Box::pin(client), MESSAGE_LEN),
        )
        .await;

        // then (期待する結果):
        assert!(matches!(
            result,
            Err(ClientError::Transport(TransportError::Closed))
        ));
        assert!(session.is_stopped());
    }

    #[tokio::test]
    async fn test_who_and_last_read_the_log() {
        // テスト項目: %who と %last N はログを読んで表示し、サーバーには何も送らない
        // given (前提条件):
        let service = std::env::temp_dir()
            .join(format!("blather-session-{}", std::process::id()))
            .display()
            .to_string();
        let path = log_path(&service);
        let lock = NamedSemaphore::create(&semaphore_name(&service), 0o600).unwrap();
        let log = LogFile::create(&path, 0o600).unwrap();
        log.write_who(&WhoSnapshot::new(vec!["alice".into(), "bob".into()]))
            .unwrap();
        for message in [
            Message::mesg("alice", "m1"),
            Message::mesg("bob", "m2"),
            Message::mesg("alice", "m3"),
        ] {
            log.append(&message).unwrap();
        }
        let (session, display, mut to_server) =
            session_with(Some(LogReader::open(&service).unwrap()));
        let (input_tx, input_rx) = mpsc::unbounded_channel();
        for line in ["%who", "%last 2", "%last"] {
            input_tx.send(InputEvent::Line(line.to_string())).unwrap();
        }
        input_tx.send(InputEvent::Interrupted).unwrap();

        // when (操作):
        input_worker(session, input_rx).await.unwrap();

        // then (期待する結果):
        assert_eq!(
            display.lines(),
            vec![
                "====================\n2 CLIENTS\n0: alice\n1: bob\n====================",
                "====================\nLAST 2 MESSAGES\n[bob]: m2\n[alice]: m3\n====================",
                "usage: %last N",
            ]
        );
        assert_eq!(
            next_message(&mut to_server).await,
            Message::departed("alice")
        );
        NamedSemaphore::unlink(lock.name()).unwrap();
        std::fs::remove_file(&path).unwrap();
    }

    #[tokio::test]
    async fn test_who_waits_for_lock_without_stalling_receive() {
        // テスト項目: ログのロック待ちの %who があっても受信ワーカーは止まらない
        // given (前提条件):
        let service = std::env::temp_dir()
            .join(format!("blather-locked-{}", std::process::id()))
            .display()
            .to_string();
        let path = log_path(&service);
        let lock = NamedSemaphore::create(&semaphore_name(&service), 0o600).unwrap();
        let log = LogFile::create(&path, 0o600).unwrap();
        log.write_who(&WhoSnapshot::new(vec!["alice".into()])).unwrap();
        let (session, display, _to_server) =
            session_with(Some(LogReader::open(&service).unwrap()));
        let guard = lock.acquire().unwrap();
        let (input_tx, input_rx) = mpsc::unbounded_channel();
        input_tx.send(InputEvent::Line("%who".to_string())).unwrap();
        let input = tokio::spawn(input_worker(session.clone(), input_rx));
        tokio::task::yield_now().await;
        let (mut server, client) = duplex(64 * 1024);
        push(&mut server, Message::joined("bob")).await;
        push(&mut server, Message::shutdown()).await;

        // when (操作):
        let received = tokio::time::timeout(
            std::time::Duration::from_secs(1),
            receive_worker(
                session.clone(),
                RecordReader::new(Box::pin(client), MESSAGE_LEN),
            ),
        )
        .await;
        drop(guard);

        // then (期待する結果):
        assert!(received.unwrap().is_ok());
        input.await.unwrap().unwrap();
        assert_eq!(
            display.lines(),
            vec![
                "-- bob JOINED --",
                "!!! server is shutting down !!!",
                "====================\n1 CLIENTS\n0: alice\n====================",
            ]
        );
        NamedSemaphore::unlink(lock.name()).unwrap();
        std::fs::remove_file(&path).unwrap();
    }
}
