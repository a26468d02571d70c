// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{RwLock, broadcast};
use tracing::{debug, error, info, warn};

use super::command::{Command, CommandError, TrackField};
use super::protocol::{
    NONCE_LEN, episode_state, err, greeting, no_such_track, notification, ok, update_outcome,
    verify_response,
};
use crate::catalog::{CatalogStore, UpdateOutcome};
use crate::error::{CatalogError, RemoteError};
use crate::events::{Event, EventReporter};
use crate::player::{PlayerRequest, SharedPlayer};
use crate::sync::{SyncEngine, SyncOptions};

/// Lines a client may fall behind by before it starts losing notifications
const BROADCAST_CAPACITY: usize = 256;

/// Listener settings
#[derive(Debug, Clone)]
pub struct RemoteSettings {
    pub bind_address: String,
    pub port: u16,
    /// Shared secret the handshake digest is computed over
    pub secret: String,
    /// How long a client has to answer the greeting
    pub handshake_timeout: Duration,
}

struct ClientHandle {
    id: u64,
    addr: SocketAddr,
}

/// The set of authenticated clients and the channel that fans `NFY` lines
/// out to them.
///
/// As an [`EventReporter`] it turns catalog, sync and player events into
/// notification lines. Sending never blocks; every client task drains its own
/// receiver.
pub struct ClientHub {
    sender: broadcast::Sender<String>,
    clients: RwLock<Vec<ClientHandle>>,
}

impl ClientHub {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            sender,
            clients: RwLock::new(Vec::new()),
        }
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Number of authenticated clients
    pub async fn client_count(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Send one line to every authenticated client
    pub fn broadcast_line(&self, line: String) {
        // An error only means nobody is listening
        let _ = self.sender.send(line);
    }

    /// Subscribe and register in one step, so a client never misses a line
    /// published after it became active
    async fn register(&self, id: u64, addr: SocketAddr) -> broadcast::Receiver<String> {
        let mut clients = self.clients.write().await;
        let receiver = self.sender.subscribe();
        clients.push(ClientHandle { id, addr });
        receiver
    }

    async fn unregister(&self, id: u64) {
        let mut clients = self.clients.write().await;
        if let Some(client) = clients.iter().find(|c| c.id == id) {
            debug!("Unregistering client {} ({})", client.id, client.addr);
        }
        clients.retain(|c| c.id != id);
    }
}

impl Default for ClientHub {
    fn default() -> Self {
        Self::new()
    }
}

impl EventReporter for ClientHub {
    fn report(&self, event: Event) {
        if let Some(line) = notification(&event) {
            self.broadcast_line(line);
        }
    }
}

/// What the session loop does after a command
enum Reply {
    Lines(Vec<String>),
    Bye,
}

impl Reply {
    fn line(line: String) -> Self {
        Self::Lines(vec![line])
    }
}

/// The remote control listener
pub struct RemoteServer {
    settings: RemoteSettings,
    hub: Arc<ClientHub>,
    engine: Arc<SyncEngine>,
    player: SharedPlayer,
    next_id: AtomicU64,
}

impl RemoteServer {
    pub fn new(
        settings: RemoteSettings,
        hub: Arc<ClientHub>,
        engine: Arc<SyncEngine>,
        player: SharedPlayer,
    ) -> Self {
        Self {
            settings,
            hub,
            engine,
            player,
            next_id: AtomicU64::new(1),
        }
    }

    fn store(&self) -> &CatalogStore {
        self.engine.store()
    }

    /// Handle for mutations, which run on the blocking pool
    fn shared_store(&self) -> &Arc<CatalogStore> {
        self.engine.store()
    }

    fn report(&self, event: Event) {
        self.store().reporter().report(event);
    }

    pub async fn bind(&self) -> Result<TcpListener, RemoteError> {
        let addr = format!("{}:{}", self.settings.bind_address, self.settings.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| RemoteError::BindFailed {
                addr: addr.clone(),
                source: e,
            })?;
        info!("Remote control listening at {}", listener.local_addr()?);
        Ok(listener)
    }

    /// Accept connections until the task is dropped. Each client runs on its
    /// own task.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    info!("Client {} connected from {}", id, peer);
                    tokio::spawn(self.clone().run_client(stream, peer, id));
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                }
            }
        }
    }

    async fn run_client(self: Arc<Self>, stream: TcpStream, addr: SocketAddr, id: u64) {
        if let Err(e) = stream.set_nodelay(true) {
            debug!("set_nodelay failed for client {}: {}", id, e);
        }
        let count = self.hub.client_count().await + 1;
        self.report(Event::ClientConnected { count, addr });

        let (read_half, mut writer) = stream.into_split();
        let mut lines = BufReader::new(read_half).lines();

        let handshake = self.authenticate(&mut lines, &mut writer);
        let authenticated = match tokio::time::timeout(self.settings.handshake_timeout, handshake)
            .await
        {
            Ok(Ok(authenticated)) => authenticated,
            Ok(Err(e)) => {
                warn!("Client {} failed during handshake: {}", id, e);
                false
            }
            Err(_) => {
                warn!("Client {} did not answer the greeting in time", id);
                false
            }
        };

        if authenticated {
            debug!("Client {} authenticated", id);
            let receiver = self.hub.register(id, addr).await;
            match self.session(&mut lines, &mut writer, receiver).await {
                Ok(()) => info!("Client {} disconnected", id),
                Err(e) => warn!("Client {} dropped: {}", id, e),
            }
            self.hub.unregister(id).await;
        }

        let count = self.hub.client_count().await;
        self.report(Event::ClientDisconnected {
            count,
            addr,
            authenticated,
        });
    }

    async fn authenticate(
        &self,
        lines: &mut Lines<BufReader<OwnedReadHalf>>,
        writer: &mut OwnedWriteHalf,
    ) -> io::Result<bool> {
        let nonce: [u8; NONCE_LEN] = rand::random();
        write_line(writer, &greeting(&nonce)).await?;

        let Some(line) = lines.next_line().await? else {
            warn!("Client disconnected before HELLO");
            return Ok(false);
        };
        if !verify_response(strip_cr(&line), &nonce, &self.settings.secret) {
            warn!("Wrong greeting '{}'", line);
            return Ok(false);
        }
        Ok(true)
    }

    async fn session(
        &self,
        lines: &mut Lines<BufReader<OwnedReadHalf>>,
        writer: &mut OwnedWriteHalf,
        mut receiver: broadcast::Receiver<String>,
    ) -> io::Result<()> {
        loop {
            tokio::select! {
                line = lines.next_line() => {
                    let Some(line) = line? else {
                        return Ok(());
                    };
                    match self.handle_line(strip_cr(&line)).await {
                        Reply::Lines(replies) => {
                            for reply in replies {
                                write_line(writer, &reply).await?;
                            }
                        }
                        Reply::Bye => {
                            write_line(writer, "BYE").await?;
                            return Ok(());
                        }
                    }
                }
                message = receiver.recv() => match message {
                    Ok(line) => write_line(writer, &line).await?,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Client missed {} notifications, resending catalog", n);
                        for line in catalog_notifications(self.store()) {
                            write_line(writer, &line).await?;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => return Ok(()),
                },
            }
        }
    }

    /// Decode and execute one command line
    async fn handle_line(&self, line: &str) -> Reply {
        match Command::parse(line) {
            Ok(Some(command)) => {
                debug!("Client said: {}", line);
                self.execute(command).await
            }
            Ok(None) => Reply::Lines(Vec::new()),
            Err(CommandError::Invalid {
                name,
                field_count,
                line,
            }) => {
                warn!("Invalid command: {}", name);
                Reply::line(err(&[&name, "invalid", &field_count.to_string(), &line]))
            }
            Err(CommandError::BadArgument { name, arg }) => {
                Reply::line(err(&[name, "Bad argument", &arg]))
            }
        }
    }

    async fn execute(&self, command: Command) -> Reply {
        let store = self.store();

        let line = match command {
            Command::Play => self.forward("PLAY", PlayerRequest::Play),
            Command::Pause => self.forward("PAUSE", PlayerRequest::Pause),
            Command::SkipForward => self.forward("SKIP-FORWARD", PlayerRequest::SkipForward),
            Command::SkipBack => self.forward("SKIP-BACK", PlayerRequest::SkipBack),
            Command::SkipToTrackStart => {
                self.forward("SKIP-TO-TRACK-START", PlayerRequest::SkipToStart)
            }
            Command::SkipToTrackEnd => self.forward("SKIP-TO-TRACK-END", PlayerRequest::SkipToEnd),
            Command::GetTracks => return self.get_tracks().await,
            Command::GetTrack { ident } => match store.find_by_ident(&ident) {
                Some(episode) => ok(&["GET-TRACK", &episode_state(&episode)]),
                None => no_such_track("GET-TRACK", &ident),
            },
            Command::GetStatus => self.forward("GET-STATUS", PlayerRequest::GetStatus),
            Command::DownloadTracks {
                force,
                max,
                then_start,
            } => {
                self.spawn_sync(SyncOptions {
                    force,
                    limit: max,
                    only_ident: None,
                    then_start,
                });
                let max = max.map_or_else(|| "-1".to_string(), |n| n.to_string());
                ok(&["DOWNLOAD-TRACKS", &max, &then_start.to_string()])
            }
            Command::DownloadTrack { ident } => {
                if store.find_by_ident(&ident).is_none() {
                    no_such_track("DOWNLOAD-TRACK", &ident)
                } else {
                    self.spawn_sync(SyncOptions {
                        force: true,
                        only_ident: Some(ident.clone()),
                        ..Default::default()
                    });
                    ok(&["DOWNLOAD-TRACK", &ident])
                }
            }
            Command::SetTrackField {
                field,
                value,
                ident,
            } => {
                let name = field.command_name();
                let (id, new_value) = (ident.clone(), value.clone());
                let result = self
                    .shared_store()
                    .blocking(move |store| match field {
                        TrackField::Priority => store.set_priority(&id, &new_value),
                        TrackField::Emoji => store.set_emoji(&id, &new_value),
                        TrackField::Title => store.set_title(&id, &new_value),
                        TrackField::Artist => store.set_artist(&id, &new_value),
                    })
                    .await;
                match result {
                    Ok(outcome) => update_outcome(name, outcome, &ident, &value),
                    Err(e) => failure(name, &ident, &e),
                }
            }
            Command::MoveToTop { ident } => {
                let id = ident.clone();
                let result = self
                    .shared_store()
                    .blocking(move |store| store.move_to_top(&id))
                    .await;
                match result {
                    Ok(UpdateOutcome::NoSuchEpisode) => no_such_track("MOVE-TO-TOP", &ident),
                    Ok(_) => ok(&["MOVE-TO-TOP", &ident]),
                    Err(e) => failure("MOVE-TO-TOP", &ident, &e),
                }
            }
            Command::DeleteFinishedTracks => match self
                .shared_store()
                .blocking(|store| store.delete_finished())
                .await
            {
                Ok(count) => ok(&["DELETE-FINISHED-TRACKS", &count.to_string()]),
                Err(e) => err(&["DELETE-FINISHED-TRACKS", &e.to_string()]),
            },
            Command::DeleteTrack { ident } => match self.engine.delete_episode(&ident).await {
                Ok(_) => ok(&["DELETE-TRACK"]),
                Err(CatalogError::NoSuchEpisode { .. }) => no_such_track("DELETE-TRACK", &ident),
                Err(CatalogError::EpisodePlaying { .. }) => {
                    err(&["DELETE-TRACK", "Track is playing", &ident])
                }
                Err(e) => failure("DELETE-TRACK", &ident, &e),
            },
            Command::SelectTrack { ident } => self.select_track(&ident).await,
            Command::Seek { ident, position_ms } => self.seek(&ident, position_ms).await,
            Command::SetVolume(change) => {
                let level = self.player.adjust_volume(change);
                ok(&[
                    "SET-VOLUME",
                    &level.current.to_string(),
                    &level.min.to_string(),
                    &level.max.to_string(),
                ])
            }
            Command::Echo { fields } => {
                self.report(Event::Echo { fields });
                ok(&["ECHO"])
            }
            Command::Bye => return Reply::Bye,
        };

        Reply::line(line)
    }

    fn forward(&self, name: &str, request: PlayerRequest) -> String {
        self.player.request(request);
        ok(&[name])
    }

    async fn get_tracks(&self) -> Reply {
        let (episodes, selected) = self.store().with_catalog(|catalog| {
            (
                catalog.episodes().to_vec(),
                catalog.selected_ident().map(String::from),
            )
        });

        let mut lines: Vec<String> = episodes
            .iter()
            .map(|episode| format!("RSP\tGET-TRACKS\t{}", episode_state(episode)))
            .collect();
        lines.push(ok(&["GET-TRACKS", &self.hub.client_count().await.to_string()]));
        self.player.request(PlayerRequest::GetStatus);
        if let Some(ident) = selected {
            lines.push(format!("NFY\tTRACK-SELECTED\t{ident}"));
        }

        Reply::Lines(lines)
    }

    /// Select an episode, or switch playback to it while playing
    async fn select_track(&self, ident: &str) -> String {
        let Some(episode) = self.store().find_by_ident(ident) else {
            return no_such_track("SELECT-TRACK", ident);
        };

        if self.player.is_playing() {
            self.player.request(PlayerRequest::PlayEpisode {
                ident: episode.ident.clone(),
                start_ms: episode.resume_ms(),
            });
        } else {
            let id = ident.to_string();
            let selected = self
                .shared_store()
                .blocking(move |store| store.select(&id).map_err(CatalogError::from))
                .await;
            if let Err(e) = selected {
                return failure("SELECT-TRACK", ident, &e);
            }
        }
        ok(&["SELECT-TRACK"])
    }

    /// Seek the player when it is on this episode, otherwise move the stored
    /// offset
    async fn seek(&self, ident: &str, position_ms: u64) -> String {
        if self.store().find_by_ident(ident).is_none() {
            return no_such_track("SEEK", ident);
        }

        let on_player =
            self.player.is_playing() && self.player.playing_ident().as_deref() == Some(ident);
        if on_player {
            self.player.request(PlayerRequest::Seek { position_ms });
        } else {
            let id = ident.to_string();
            let moved = self
                .shared_store()
                .blocking(move |store| store.seek(&id, position_ms))
                .await;
            if let Err(e) = moved {
                return failure("SEEK", ident, &e);
            }
        }
        ok(&["SEEK"])
    }

    fn spawn_sync(&self, options: SyncOptions) {
        let engine = self.engine.clone();
        tokio::spawn(async move {
            match engine.run(&options).await {
                Ok(result) => debug!("Sync finished: {:?}", result),
                Err(e) => warn!("Sync failed: {}", e),
            }
        });
    }
}

/// The whole catalog as notification lines, for a client that lost some:
/// one `TRACK-UPDATED` per episode, then the selection
fn catalog_notifications(store: &CatalogStore) -> Vec<String> {
    store.with_catalog(|catalog| {
        let mut lines: Vec<String> = catalog
            .episodes()
            .iter()
            .map(|episode| format!("NFY\tTRACK-UPDATED\t{}", episode_state(episode)))
            .collect();
        if let Some(ident) = catalog.selected_ident() {
            lines.push(format!("NFY\tTRACK-SELECTED\t{ident}"));
        }
        lines
    })
}

fn failure(name: &str, ident: &str, error: &dyn std::error::Error) -> String {
    warn!("{} {} failed: {}", name, ident, error);
    err(&[name, &error.to_string(), ident])
}

fn strip_cr(line: &str) -> &str {
    line.strip_suffix('\r').unwrap_or(line)
}

async fn write_line(writer: &mut OwnedWriteHalf, line: &str) -> io::Result<()> {
    let mut bytes = Vec::with_capacity(line.len() + 1);
    bytes.extend_from_slice(line.as_bytes());
    bytes.push(b'\n');
    writer.write_all(&bytes).await
}

#[cfg(test)]
mod tests {
    use super::*;

    use tempfile::{TempDir, tempdir};
    use tokio::time::timeout;
    use url::Url;

    use crate::http::testing::MockOrigin;
    use crate::metadata::TagRecord;
    use crate::origin::OriginClient;
    use crate::player::testing::RecordingPlayer;
    use crate::remote::protocol::{GREETING, expected_response, make_line};
    use crate::state::Library;
    use crate::sync::{SharedHttpClient, StaticNetwork, SyncPolicy};

    const SECRET: &str = "letmein";

    struct Fixture {
        _dir: TempDir,
        addr: SocketAddr,
        hub: Arc<ClientHub>,
        player: Arc<RecordingPlayer>,
        engine: Arc<SyncEngine>,
    }

    fn record(ident: &str, priority: &str) -> TagRecord {
        TagRecord {
            ident: ident.to_string(),
            priority: priority.to_string(),
            duration_ms: 60_000,
            title: format!("Title {ident}"),
            artist: "Artist".to_string(),
            size: 4,
            when: 1000,
            quiet: vec![],
            emoji: None,
            feed_url: None,
            track_url: None,
        }
    }

    async fn start() -> Fixture {
        let dir = tempdir().unwrap();
        let library = Library::open(dir.path()).unwrap();
        for (ident, priority) in [("a", "F1"), ("b", "F2")] {
            library.write_tags(&record(ident, priority), false).unwrap();
            std::fs::write(library.audio_path(ident), b"data").unwrap();
        }

        let hub = ClientHub::shared();
        let store = Arc::new(CatalogStore::load(library, hub.clone()).unwrap());
        let origin = MockOrigin::new();
        let http: SharedHttpClient = origin;
        let player = RecordingPlayer::new();
        let engine = Arc::new(SyncEngine::new(
            store,
            OriginClient::new(http, Url::parse("http://origin.test/").unwrap(), "pw"),
            player.clone(),
            Arc::new(StaticNetwork { metered: false }),
            SyncPolicy::default(),
        ));

        let server = Arc::new(RemoteServer::new(
            RemoteSettings {
                bind_address: "127.0.0.1".to_string(),
                port: 0,
                secret: SECRET.to_string(),
                handshake_timeout: Duration::from_secs(5),
            },
            hub.clone(),
            engine.clone(),
            player.clone(),
        ));
        let listener = server.bind().await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(server.serve(listener));

        Fixture {
            _dir: dir,
            addr,
            hub,
            player,
            engine,
        }
    }

    struct TestClient {
        lines: Lines<BufReader<OwnedReadHalf>>,
        writer: OwnedWriteHalf,
    }

    impl TestClient {
        async fn connect(addr: SocketAddr) -> Self {
            let stream = TcpStream::connect(addr).await.unwrap();
            let (read_half, writer) = stream.into_split();
            Self {
                lines: BufReader::new(read_half).lines(),
                writer,
            }
        }

        /// Connect and complete the handshake, then wait until the session
        /// is live
        async fn login(addr: SocketAddr) -> Self {
            let mut client = Self::connect(addr).await;
            let greeting = client.next_line().await.unwrap();
            let nonce = hex::decode(greeting.strip_prefix("HELLO\t").unwrap()).unwrap();
            client
                .send(&make_line(&[
                    GREETING,
                    expected_response(&nonce, SECRET).as_str(),
                ]))
                .await;
            client.send("GET-STATUS").await;
            client.expect("OK\tGET-STATUS").await;
            client
        }

        async fn send(&mut self, line: &str) {
            self.writer
                .write_all(format!("{line}\n").as_bytes())
                .await
                .unwrap();
        }

        async fn next_line(&mut self) -> Option<String> {
            timeout(Duration::from_secs(5), self.lines.next_line())
                .await
                .expect("timed out waiting for a line")
                .unwrap()
        }

        /// Next line starting with `prefix`, skipping unrelated notifications
        async fn expect(&mut self, prefix: &str) -> String {
            loop {
                let line = self.next_line().await.expect("connection closed");
                if line.starts_with(prefix) {
                    return line;
                }
                assert!(line.starts_with("NFY\t"), "unexpected line {line:?}");
            }
        }
    }

    #[tokio::test]
    async fn lagging_receiver_gets_catalog_again() {
        let f = start().await;
        f.engine.store().select("a").unwrap();
        let peer: SocketAddr = "127.0.0.1:9".parse().unwrap();
        let mut receiver = f.hub.register(99, peer).await;

        for i in 0..BROADCAST_CAPACITY + 10 {
            f.hub.broadcast_line(format!("ECHO\t{i}"));
        }

        assert!(matches!(
            receiver.recv().await,
            Err(broadcast::error::RecvError::Lagged(10))
        ));
        let lines = catalog_notifications(f.engine.store());
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("NFY\tTRACK-UPDATED\tF1\ta\t"));
        assert!(lines[1].starts_with("NFY\tTRACK-UPDATED\tF2\tb\t"));
        assert_eq!(lines[2], "NFY\tTRACK-SELECTED\ta");
        assert_eq!(receiver.recv().await.unwrap(), "ECHO\t10");

        f.hub.unregister(99).await;
    }

    #[tokio::test]
    async fn wrong_digest_is_dropped_without_registering() {
        let f = start().await;
        let mut client = TestClient::connect(f.addr).await;

        let greeting = client.next_line().await.unwrap();
        assert!(greeting.starts_with("HELLO\t"));
        assert_eq!(greeting.len(), "HELLO\t".len() + 2 * NONCE_LEN);

        client.send("HELLO\t00000000000000000000000000000000").await;

        assert_eq!(client.next_line().await, None);
        assert_eq!(f.hub.client_count().await, 0);
    }

    #[tokio::test]
    async fn wrong_keyword_is_dropped() {
        let f = start().await;
        let mut client = TestClient::connect(f.addr).await;
        client.next_line().await.unwrap();

        client.send("PLAY").await;

        assert_eq!(client.next_line().await, None);
    }

    #[tokio::test]
    async fn get_tracks_lists_catalog_then_ok() {
        let f = start().await;
        f.engine.store().select("b").unwrap();
        let mut client = TestClient::login(f.addr).await;

        client.send("GET-TRACKS").await;

        let first = client.expect("RSP\tGET-TRACKS\t").await;
        assert!(first.starts_with("RSP\tGET-TRACKS\tF1\ta\t0\t60000\tTitle a\t"));
        client.expect("RSP\tGET-TRACKS\tF2\tb\t").await;
        assert_eq!(client.expect("OK\tGET-TRACKS").await, "OK\tGET-TRACKS\t1");
        assert_eq!(
            client.expect("NFY\tTRACK-SELECTED").await,
            "NFY\tTRACK-SELECTED\tb"
        );
        assert!(f.player.requests().contains(&PlayerRequest::GetStatus));
    }

    #[tokio::test]
    async fn get_track_reports_missing_ident() {
        let f = start().await;
        let mut client = TestClient::login(f.addr).await;

        client.send("GET-TRACK\tzz").await;
        assert_eq!(
            client.expect("ERR").await,
            "ERR\tGET-TRACK\tNo such track\tzz"
        );

        client.send("GET-TRACK\ta").await;
        assert!(client.expect("OK\tGET-TRACK\t").await.contains("\ta\t"));
    }

    #[tokio::test]
    async fn mutation_is_broadcast_to_other_clients() {
        let f = start().await;
        let mut actor = TestClient::login(f.addr).await;
        let mut observer = TestClient::login(f.addr).await;

        actor.send("SET-TRACK-PRIORITY\tA0\tb").await;

        assert_eq!(
            actor.expect("OK\tSET-TRACK-PRIORITY").await,
            "OK\tSET-TRACK-PRIORITY\tupdated\tb\tA0"
        );
        let nfy = observer.expect("NFY\tTRACK-UPDATED").await;
        assert!(nfy.starts_with("NFY\tTRACK-UPDATED\tA0\tb\t"));

        actor.send("SET-TRACK-PRIORITY\tA0\tb").await;
        assert_eq!(
            actor.expect("OK\tSET-TRACK-PRIORITY").await,
            "OK\tSET-TRACK-PRIORITY\tunchanged\tb\tA0"
        );
        actor.send("SET-TRACK-PRIORITY\tA0\tzz").await;
        assert_eq!(
            actor.expect("ERR").await,
            "ERR\tSET-TRACK-PRIORITY\tNo such track\tzz"
        );
    }

    #[tokio::test]
    async fn invalid_and_blank_lines() {
        let f = start().await;
        let mut client = TestClient::login(f.addr).await;

        client.send("").await;
        client.send("PLAY\tloudly").await;
        assert_eq!(
            client.expect("ERR").await,
            "ERR\tPLAY\tinvalid\t2\tPLAY\tloudly"
        );

        client.send("SET-VOLUME\tLOUD").await;
        assert_eq!(
            client.expect("ERR").await,
            "ERR\tSET-VOLUME\tBad argument\tLOUD"
        );

        client.send("SET-VOLUME\tSAME").await;
        assert_eq!(client.expect("OK").await, "OK\tSET-VOLUME\t5\t0\t10");
    }

    #[tokio::test]
    async fn transport_commands_reach_player() {
        let f = start().await;
        let mut client = TestClient::login(f.addr).await;

        client.send("PLAY").await;
        assert_eq!(client.expect("OK").await, "OK\tPLAY");
        client.send("SKIP-BACK").await;
        assert_eq!(client.expect("OK").await, "OK\tSKIP-BACK");

        let requests = f.player.requests();
        assert!(requests.contains(&PlayerRequest::Play));
        assert!(requests.contains(&PlayerRequest::SkipBack));
    }

    #[tokio::test]
    async fn select_and_seek_depend_on_playback() {
        let f = start().await;
        let mut client = TestClient::login(f.addr).await;

        client.send("SELECT-TRACK\ta").await;
        assert_eq!(client.expect("OK").await, "OK\tSELECT-TRACK");
        assert_eq!(f.engine.store().selected().unwrap().ident, "a");

        client.send("SEEK\ta\t2000").await;
        assert_eq!(client.expect("OK").await, "OK\tSEEK");
        assert_eq!(f.engine.store().find_by_ident("a").unwrap().current_ms, 2000);

        f.player.set_playing(Some("a"));
        client.send("SEEK\ta\t9000").await;
        client.expect("OK\tSEEK").await;
        assert!(f
            .player
            .requests()
            .contains(&PlayerRequest::Seek { position_ms: 9000 }));
        assert_eq!(f.engine.store().find_by_ident("a").unwrap().current_ms, 2000);

        client.send("SELECT-TRACK\tb").await;
        client.expect("OK\tSELECT-TRACK").await;
        assert!(f.player.requests().contains(&PlayerRequest::PlayEpisode {
            ident: "b".to_string(),
            start_ms: 0
        }));
    }

    #[tokio::test]
    async fn delete_track_refuses_playing_episode() {
        let f = start().await;
        let mut client = TestClient::login(f.addr).await;
        f.player.set_playing(Some("a"));

        client.send("DELETE-TRACK\ta").await;
        assert_eq!(
            client.expect("ERR").await,
            "ERR\tDELETE-TRACK\tTrack is playing\ta"
        );

        client.send("DELETE-TRACK\tb").await;
        assert_eq!(client.expect("OK").await, "OK\tDELETE-TRACK");
        assert!(f.engine.store().find_by_ident("b").is_none());

        client.send("DELETE-TRACK\tb").await;
        assert_eq!(
            client.expect("ERR").await,
            "ERR\tDELETE-TRACK\tNo such track\tb"
        );
    }

    #[tokio::test]
    async fn delete_finished_and_move_to_top() {
        let f = start().await;
        let mut client = TestClient::login(f.addr).await;
        f.engine.store().seek("a", 60_000).unwrap();

        client.send("MOVE-TO-TOP\tb").await;
        assert_eq!(client.expect("OK").await, "OK\tMOVE-TO-TOP\tb");
        assert_eq!(f.engine.store().find_by_ident("b").unwrap().priority, "=0001");

        client.send("DELETE-FINISHED-TRACKS").await;
        assert_eq!(client.expect("OK").await, "OK\tDELETE-FINISHED-TRACKS\t1");
    }

    #[tokio::test]
    async fn download_tracks_acknowledges_immediately() {
        let f = start().await;
        let mut client = TestClient::login(f.addr).await;

        client.send("DOWNLOAD-TRACKS\ttrue\t3").await;
        assert_eq!(
            client.expect("OK\tDOWNLOAD-TRACKS").await,
            "OK\tDOWNLOAD-TRACKS\t3\tfalse"
        );
        client.expect("NFY\tPOLLING-FOR-TRACKS\tSTART").await;
        assert_eq!(
            client.expect("NFY\tPOLLING-FOR-TRACKS\tFINISH").await,
            "NFY\tPOLLING-FOR-TRACKS\tFINISH\t0"
        );

        client.send("DOWNLOAD-TRACK\tzz").await;
        assert_eq!(
            client.expect("ERR").await,
            "ERR\tDOWNLOAD-TRACK\tNo such track\tzz"
        );
    }

    #[tokio::test]
    async fn echo_is_broadcast() {
        let f = start().await;
        let mut client = TestClient::login(f.addr).await;

        client.send("ECHO\tping").await;

        assert_eq!(client.expect("OK\tECHO").await, "OK\tECHO");
        assert_eq!(client.expect("ECHO\tping").await, "ECHO\tping");
    }

    #[tokio::test]
    async fn bye_closes_and_unregisters() {
        let f = start().await;
        let mut observer = TestClient::login(f.addr).await;
        let mut client = TestClient::login(f.addr).await;
        assert_eq!(f.hub.client_count().await, 2);

        client.send("BYE").await;
        assert_eq!(client.expect("BYE").await, "BYE");
        assert_eq!(client.next_line().await, None);

        let nfy = observer.expect("NFY\tCLIENT-CONNECT\tDISCONNECT").await;
        assert_eq!(nfy, "NFY\tCLIENT-CONNECT\tDISCONNECT\t1\t127.0.0.1\ttrue");
        assert_eq!(f.hub.client_count().await, 1);
    }
}
