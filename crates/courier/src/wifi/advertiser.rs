//! UDP advertisement of the offered book
//!
//! Once per interval the advertiser resolves the local IPv4 interface and
//! broadcasts an [`Advertisement`] datagram to its subnet. The serialized payload is kept
//! and reused until the address or the book version changes, so a steady
//! state tick costs one address lookup and one `send_to`.

use crate::config::CourierConfig;
use crate::wifi::address::{
    COULD_NOT_DETERMINE, HostAddressResolver, LocalAddressResolver, LocalInterface,
    broadcast_address,
};
use bytes::Bytes;
use common::{Error, ProgressKind, ProgressSink, Result};
use protocol::{ADVERTISE_PORT, Advertisement, PROTOCOL_VERSION, encode_advertisement};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// How long `stop` waits for the loop to wind down
const STOP_TIMEOUT: Duration = Duration::from_secs(2);

/// The parts of a book that go into an advertisement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvertisedBook {
    /// Must equal the file name (without extension) the book is sent as
    pub title: String,
    pub version: String,
    pub language: String,
}

/// Serialized advertisement, rebuilt only when its inputs change
#[derive(Debug, Default)]
pub struct AdvertisementCache {
    /// `(ip, version)` the payload was built for
    key: Option<(String, String)>,
    payload: Bytes,
    serializations: usize,
}

impl AdvertisementCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Force a rebuild on the next call to [`AdvertisementCache::payload`]
    pub fn invalidate(&mut self) {
        self.key = None;
    }

    /// Payload for the given address, reusing the previous buffer if nothing changed
    pub fn payload(
        &mut self,
        ip: &str,
        book: &AdvertisedBook,
        sender: &str,
    ) -> protocol::Result<Bytes> {
        let fresh = matches!(
            &self.key,
            Some((cached_ip, cached_version)) if cached_ip == ip && *cached_version == book.version
        );

        if !fresh {
            let advert = Advertisement {
                title: book.title.clone(),
                version: book.version.clone(),
                language: book.language.clone(),
                protocol_version: PROTOCOL_VERSION.to_string(),
                sender: sender.to_string(),
                sender_ip: Some(ip.to_string()),
            };
            self.payload = encode_advertisement(&advert)?;
            self.key = Some((ip.to_string(), book.version.clone()));
            self.serializations += 1;
            debug!("Advertisement rebuilt for {} ({} bytes)", ip, self.payload.len());
        }

        Ok(self.payload.clone())
    }

    /// Number of times the payload has been serialized
    pub fn serializations(&self) -> usize {
        self.serializations
    }
}

struct AdvertiserState {
    book: AdvertisedBook,
    cache: AdvertisementCache,
}

struct Shared {
    state: Mutex<AdvertiserState>,
    paused: AtomicBool,
}

/// Cloneable handle for adjusting a running advertiser
#[derive(Clone)]
pub struct AdvertiserControl {
    shared: Arc<Shared>,
}

impl AdvertiserControl {
    fn lock(&self) -> MutexGuard<'_, AdvertiserState> {
        self.shared.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Stop sending without closing the socket
    pub fn pause(&self) {
        self.shared.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.shared.paused.store(false, Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        self.shared.paused.load(Ordering::SeqCst)
    }

    /// Change the advertised version; picked up on the next tick
    pub fn set_version(&self, version: impl Into<String>) {
        let version = version.into();
        let mut state = self.lock();
        if state.book.version != version {
            debug!("Advertised version {} -> {}", state.book.version, version);
            state.book.version = version;
            state.cache.invalidate();
        }
    }

    pub fn book(&self) -> AdvertisedBook {
        self.lock().book.clone()
    }

    pub fn serializations(&self) -> usize {
        self.lock().cache.serializations()
    }

    fn payload(&self, ip: &str, sender: &str) -> protocol::Result<Bytes> {
        let mut state = self.lock();
        let AdvertiserState { book, cache } = &mut *state;
        cache.payload(ip, book, sender)
    }
}

/// Where and how often to advertise
#[derive(Debug, Clone)]
pub struct AdvertiserOptions {
    /// Destination port of the broadcast
    pub port: u16,
    /// Fixed destination, replacing the directed broadcast of the local subnet
    pub broadcast: Option<Ipv4Addr>,
    /// Replaces the netmask reported for the local interface
    pub subnet_mask: Option<Ipv4Addr>,
    pub interval: Duration,
}

impl Default for AdvertiserOptions {
    fn default() -> Self {
        Self {
            port: ADVERTISE_PORT,
            broadcast: None,
            subnet_mask: None,
            interval: Duration::from_secs(1),
        }
    }
}

impl AdvertiserOptions {
    pub fn from_config(config: &CourierConfig) -> anyhow::Result<Self> {
        Ok(Self {
            port: config.wifi.advertise_port,
            broadcast: config.wifi.broadcast_ip()?,
            subnet_mask: config.wifi.subnet_mask_ip()?,
            interval: config.wifi.advertise_interval(),
        })
    }

    /// Where the next datagram goes
    ///
    /// Falls back to the limited broadcast address when no interface is known.
    pub fn destination(&self, local: Option<LocalInterface>) -> SocketAddr {
        let addr = match (self.broadcast, local) {
            (Some(fixed), _) => fixed,
            (None, Some(iface)) => {
                broadcast_address(iface.ip, self.subnet_mask.unwrap_or(iface.netmask))
            }
            (None, None) => Ipv4Addr::BROADCAST,
        };
        SocketAddr::from((addr, self.port))
    }
}

/// Broadcasts the offered book until stopped
pub struct WifiAdvertiser {
    control: AdvertiserControl,
    options: AdvertiserOptions,
    progress: Arc<dyn ProgressSink>,
    resolver: Arc<dyn LocalAddressResolver>,
    sender_name: String,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl WifiAdvertiser {
    pub fn new(
        book: AdvertisedBook,
        options: AdvertiserOptions,
        progress: Arc<dyn ProgressSink>,
    ) -> Self {
        let sender_name = hostname::get()
            .map_or_else(|_| "Unknown".to_string(), |h| h.to_string_lossy().to_string());

        Self {
            control: AdvertiserControl {
                shared: Arc::new(Shared {
                    state: Mutex::new(AdvertiserState {
                        book,
                        cache: AdvertisementCache::new(),
                    }),
                    paused: AtomicBool::new(false),
                }),
            },
            options,
            progress,
            resolver: Arc::new(HostAddressResolver::new()),
            sender_name,
            cancel: CancellationToken::new(),
            task: None,
        }
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn LocalAddressResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_sender_name(mut self, name: impl Into<String>) -> Self {
        self.sender_name = name.into();
        self
    }

    pub fn control(&self) -> AdvertiserControl {
        self.control.clone()
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Open the socket and start the background loop
    pub async fn start(&mut self) -> Result<()> {
        if self.is_running() {
            return Ok(());
        }

        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))
            .await
            .map_err(|e| Error::Network(format!("Failed to bind advertiser socket: {}", e)))?;
        socket
            .set_broadcast(true)
            .map_err(|e| Error::Network(format!("Failed to enable broadcast: {}", e)))?;

        self.cancel = CancellationToken::new();
        let advertising = Advertising {
            socket,
            control: self.control.clone(),
            options: self.options.clone(),
            progress: self.progress.clone(),
            resolver: self.resolver.clone(),
            sender_name: self.sender_name.clone(),
            cancel: self.cancel.clone(),
        };

        info!(
            "Advertising \"{}\" to UDP port {}",
            self.control.book().title,
            self.options.port
        );
        self.task = Some(tokio::spawn(advertising.run()));
        Ok(())
    }

    /// Stop the loop and close the socket
    ///
    /// Safe to call while a send is in flight; the send is abandoned.
    pub async fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            match tokio::time::timeout(STOP_TIMEOUT, task).await {
                Ok(Ok(())) => debug!("Advertiser stopped"),
                Ok(Err(e)) => warn!("Advertiser task failed: {}", e),
                Err(_) => warn!("Advertiser did not stop within {:?}", STOP_TIMEOUT),
            }
        }
    }
}

impl Drop for WifiAdvertiser {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// State owned by the running loop; the socket closes when it is dropped
struct Advertising {
    socket: UdpSocket,
    control: AdvertiserControl,
    options: AdvertiserOptions,
    progress: Arc<dyn ProgressSink>,
    resolver: Arc<dyn LocalAddressResolver>,
    sender_name: String,
    cancel: CancellationToken,
}

impl Advertising {
    async fn run(self) {
        self.progress.message(
            "beginAdvertising",
            "Advertising book to Bloom Readers on local network...",
            &[],
        );

        let mut ticker = tokio::time::interval(self.options.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            if self.control.is_paused() {
                continue;
            }

            if let Err(e) = self.advertise_once().await {
                error!("Advertiser failed: {}", e);
                self.progress.message_without_localizing(
                    &format!("Error in Advertiser: {}", e),
                    ProgressKind::Error,
                );
                break;
            }
        }

        debug!("Advertiser loop exited");
    }

    async fn advertise_once(&self) -> Result<()> {
        let resolver = self.resolver.clone();
        let local = tokio::task::spawn_blocking(move || resolver.local_interface())
            .await
            .map_err(|e| Error::Other(format!("Address lookup failed: {}", e)))?;

        let ip_text = local.map_or_else(
            || COULD_NOT_DETERMINE.to_string(),
            |iface| iface.ip.to_string(),
        );
        let payload = self
            .control
            .payload(&ip_text, &self.sender_name)
            .map_err(|e| Error::Other(e.to_string()))?;
        let dest = self.options.destination(local);

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Ok(()),
            sent = self.socket.send_to(&payload, dest) => {
                sent.map_err(|e| Error::Network(format!("Failed to send advertisement to {}: {}", dest, e)))?;
                trace!("Advertisement sent to {}", dest);
                Ok(())
            }
        }
    }
}
