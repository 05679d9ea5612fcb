//! WiFi publishing: advertise a book and deliver it to readers that ask
//!
//! The listener is bound before the advertiser starts, so no reader can see
//! the offer before its request would be heard. Requests are handled one at
//! a time; anything arriving while a send is in progress is dropped, and the
//! reader retries on its own once advertising resumes.

use crate::bundle::{BUNDLE_EXTENSION, Book, Bundle, sanitize_file_name, version_code};
use crate::config::CourierConfig;
use crate::wifi::address::{HostAddressResolver, LocalAddressResolver};
use crate::wifi::advertiser::{AdvertisedBook, AdvertiserControl, AdvertiserOptions, WifiAdvertiser};
use crate::wifi::listener::{AckListener, PacketHandler};
use crate::wifi::sender::BookSender;
use async_channel::Receiver;
use bytes::Bytes;
use common::{PrefixedProgress, ProgressKind, ProgressSink, Result};
use protocol::{ACK_PORT, decode_book_request};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Id prefix of every progress message from the WiFi channel
pub const WIFI_PROGRESS_PREFIX: &str = "PublishTab.Android.Wifi.Progress.";

/// How long `stop` lets an in-flight send finish
const SEND_DRAIN_TIMEOUT: Duration = Duration::from_secs(3);

const FAILED_TEXT: &str = "There was an error while sending the book. Possibly the device was disconnected? If you can't see a reason for this the following may be helpful to report to the developers:";

#[derive(Debug, Clone)]
pub struct WifiOptions {
    /// UDP port book requests arrive on
    pub listen_port: u16,
    pub advertiser: AdvertiserOptions,
}

impl Default for WifiOptions {
    fn default() -> Self {
        Self {
            listen_port: ACK_PORT,
            advertiser: AdvertiserOptions::default(),
        }
    }
}

impl WifiOptions {
    pub fn from_config(config: &CourierConfig) -> anyhow::Result<Self> {
        Ok(Self {
            listen_port: config.wifi.listen_port,
            advertiser: AdvertiserOptions::from_config(config)?,
        })
    }
}

struct Running {
    advertiser: WifiAdvertiser,
    listener: AckListener,
    worker: JoinHandle<()>,
    cancel: CancellationToken,
}

/// Offers one book on the local network until stopped
pub struct WifiPublisher {
    options: WifiOptions,
    sender: Arc<dyn BookSender>,
    progress: Arc<dyn ProgressSink>,
    resolver: Arc<dyn LocalAddressResolver>,
    sender_name: Option<String>,
    running: Option<Running>,
}

impl WifiPublisher {
    pub fn new(
        options: WifiOptions,
        sender: Arc<dyn BookSender>,
        progress: Arc<dyn ProgressSink>,
    ) -> Self {
        Self {
            options,
            sender,
            progress: Arc::new(PrefixedProgress::new(progress, WIFI_PROGRESS_PREFIX)),
            resolver: Arc::new(HostAddressResolver::new()),
            sender_name: None,
            running: None,
        }
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn LocalAddressResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    /// Override the machine name put in advertisements
    pub fn with_sender_name(mut self, name: impl Into<String>) -> Self {
        self.sender_name = Some(name.into());
        self
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Address the book request listener is bound to
    pub fn listen_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(|r| r.listener.local_addr())
    }

    pub fn advertiser(&self) -> Option<AdvertiserControl> {
        self.running.as_ref().map(|r| r.advertiser.control())
    }

    /// Start advertising `book` and serving `bundle` to readers that ask
    ///
    /// A publisher that is already running is stopped first.
    pub async fn start(&mut self, book: &Book, bundle: Bundle) -> Result<()> {
        if self.running.is_some() {
            self.stop().await;
        }

        let busy = Arc::new(AtomicBool::new(false));
        let (tx, rx) = async_channel::unbounded::<Bytes>();
        let handler: PacketHandler = {
            let busy = busy.clone();
            Arc::new(move |packet: Bytes| {
                if busy.swap(true, Ordering::SeqCst) {
                    debug!("Ignoring book request, a send is already in progress");
                    return;
                }
                if tx.try_send(packet).is_err() {
                    busy.store(false, Ordering::SeqCst);
                }
            })
        };

        let mut listener = AckListener::bind(self.options.listen_port, handler).await?;

        let advertised = AdvertisedBook {
            title: bundle
                .file_name
                .strip_suffix(BUNDLE_EXTENSION)
                .map(str::to_string)
                .unwrap_or_else(|| sanitize_file_name(&book.title)),
            version: bundle.version.clone(),
            language: book.language.clone(),
        };
        let mut advertiser = WifiAdvertiser::new(
            advertised,
            self.options.advertiser.clone(),
            self.progress.clone(),
        )
        .with_resolver(self.resolver.clone());
        if let Some(name) = &self.sender_name {
            advertiser = advertiser.with_sender_name(name.clone());
        }

        if let Err(e) = advertiser.start().await {
            if let Err(stop_err) = listener.stop_listener().await {
                debug!("Listener stopped with error: {}", stop_err);
            }
            return Err(e);
        }

        let cancel = CancellationToken::new();
        let worker = RequestWorker {
            requests: rx,
            busy,
            advertiser: advertiser.control(),
            sender: self.sender.clone(),
            progress: self.progress.clone(),
            title: book.title.clone(),
            bundle,
            cancel: cancel.clone(),
        };
        let worker = tokio::spawn(worker.run());

        self.progress.message_of_kind(
            "WifiInstructions",
            "On the Android, run Bloom Reader, open the menu and choose 'Receive Books from computer'. You can do this on as many devices as you like. Make sure each device is connected to the same network as this computer.",
            &[],
            ProgressKind::Instruction,
        );

        self.running = Some(Running {
            advertiser,
            listener,
            worker,
            cancel,
        });
        Ok(())
    }

    /// Stop advertising and listening
    ///
    /// A send in progress gets a short grace period before it is abandoned.
    pub async fn stop(&mut self) {
        let Some(mut running) = self.running.take() else {
            return;
        };

        running.advertiser.stop().await;
        running.cancel.cancel();
        if tokio::time::timeout(SEND_DRAIN_TIMEOUT, &mut running.worker)
            .await
            .is_err()
        {
            warn!("Send still running after {:?}, abandoning it", SEND_DRAIN_TIMEOUT);
            running.worker.abort();
        }
        if let Err(e) = running.listener.stop_listener().await {
            warn!("Book request listener ended with error: {}", e);
        }
        info!("WiFi publishing stopped");
    }
}

/// Handles queued book requests one at a time
struct RequestWorker {
    requests: Receiver<Bytes>,
    busy: Arc<AtomicBool>,
    advertiser: AdvertiserControl,
    sender: Arc<dyn BookSender>,
    progress: Arc<dyn ProgressSink>,
    title: String,
    bundle: Bundle,
    cancel: CancellationToken,
}

impl RequestWorker {
    async fn run(self) {
        loop {
            let packet = tokio::select! {
                _ = self.cancel.cancelled() => break,
                packet = self.requests.recv() => match packet {
                    Ok(packet) => packet,
                    Err(_) => break,
                },
            };
            self.handle(packet).await;
            self.busy.store(false, Ordering::SeqCst);
        }
        debug!("Book request worker exited");
    }

    async fn handle(&self, packet: Bytes) {
        let request = match decode_book_request(&packet) {
            Ok(request) => request,
            Err(e) => {
                warn!("Bad book request: {}", e);
                self.progress.error(
                    "BadBookRequest",
                    "Got a book request we could not process. Possibly the device is running an incompatible version of BloomReader?",
                );
                self.progress.error_without_localizing(&format!(
                    " Request contains {}; trying to interpret as JSON we got {}",
                    String::from_utf8_lossy(&packet),
                    e
                ));
                return;
            }
        };

        let device = if request.device_name.is_empty() {
            request.device_address.as_str()
        } else {
            request.device_name.as_str()
        };

        self.advertiser.pause();
        self.progress.message(
            "Sending",
            "Sending \"{0}\" to device {1}",
            &[self.title.as_str(), device],
        );
        info!("Sending {} to {} at {}", self.bundle.file_name, device, request.device_address);

        match self.sender.send_book(&request, &self.bundle).await {
            Ok(()) => {
                self.progress.message_of_kind(
                    "BookSent",
                    "You can now read \"{0}\" in Bloom Reader!",
                    &[self.title.as_str()],
                    ProgressKind::Note,
                );
                self.refresh_version().await;
            }
            Err(e) => {
                error!("Sending to {} failed: {}", device, e);
                self.progress.error("Failed", FAILED_TEXT);
                self.progress.error_without_localizing(&e.to_string());
            }
        }

        self.advertiser.resume();
    }

    /// Advertise the version of the bundle file as it was actually sent
    async fn refresh_version(&self) {
        let path = self.bundle.path.clone();
        match tokio::task::spawn_blocking(move || version_code(&path)).await {
            Ok(Ok(version)) => self.advertiser.set_version(version),
            Ok(Err(e)) => debug!("Could not recompute bundle version: {}", e),
            Err(e) => debug!("Version task failed: {}", e),
        }
    }
}
