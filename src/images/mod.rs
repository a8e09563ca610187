//! Cover-art resolution
//!
//! An ordered list of providers resolves per-song artwork URLs. Resolution
//! runs on a single background worker fed by a bounded queue; the worker
//! emits `true` when it starts draining and `false` once the queue is empty
//! again, so the images resource can mirror the busy state. A full-library
//! rescan is single-flight.

pub mod local;

use crate::error::{Error, Result};
use crate::song::Song;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

/// One source of cover-art URLs
#[async_trait]
pub trait ImageProvider: Send + Sync {
    /// Resolve URLs for one song unless it is already known.
    async fn update(&self, song: &Song) -> Result<()>;

    /// Invalidate and re-resolve one song as part of rescan `batch`.
    async fn rescan(&self, song: &Song, batch: Uuid) -> Result<()>;

    /// Synchronous lookup. The flag reports whether the song needs no
    /// further work from this provider.
    fn get_urls(&self, song: &Song) -> (Vec<String>, bool);
}

enum Job {
    Update(Vec<Song>),
    Rescan(Vec<Song>, Uuid),
}

const QUEUE_CAPACITY: usize = 64;

/// Asynchronous cover-resolution queue over an ordered provider list
pub struct ImageBatch {
    providers: Vec<Arc<dyn ImageProvider>>,
    jobs: mpsc::Sender<Job>,
    events: std::sync::Mutex<Option<mpsc::Receiver<bool>>>,
    rescanning: Arc<AtomicBool>,
    cancel: watch::Sender<bool>,
    worker: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl ImageBatch {
    pub fn new(providers: Vec<Arc<dyn ImageProvider>>) -> Self {
        let (jobs_tx, jobs_rx) = mpsc::channel(QUEUE_CAPACITY);
        let (events_tx, events_rx) = mpsc::channel(2);
        let (cancel, cancel_rx) = watch::channel(false);
        let rescanning = Arc::new(AtomicBool::new(false));
        let worker = tokio::spawn(worker_loop(
            providers.clone(),
            jobs_rx,
            events_tx,
            rescanning.clone(),
            cancel_rx,
        ));
        Self {
            providers,
            jobs: jobs_tx,
            events: std::sync::Mutex::new(Some(events_rx)),
            rescanning,
            cancel,
            worker: std::sync::Mutex::new(Some(worker)),
        }
    }

    /// Union of every provider's URLs, and whether all providers consider
    /// the song complete.
    pub fn get_urls(&self, song: &Song) -> (Vec<String>, bool) {
        let mut urls = Vec::new();
        let mut complete = true;
        for provider in &self.providers {
            let (mut u, c) = provider.get_urls(song);
            urls.append(&mut u);
            complete &= c;
        }
        (urls, complete)
    }

    /// Enqueue songs whose covers still need resolution. Lossy on overflow:
    /// the songs will be re-offered on the next cache refresh.
    pub fn update(&self, songs: Vec<Song>) {
        if songs.is_empty() {
            return;
        }
        if self.jobs.try_send(Job::Update(songs)).is_err() {
            debug!("image queue full, postponing cover resolution");
        }
    }

    /// Start a full-library rescan across every provider. Fails while a
    /// rescan is already running.
    pub fn rescan(&self, library: Vec<Song>) -> Result<()> {
        if self.rescanning.swap(true, Ordering::SeqCst) {
            return Err(Error::AlreadyUpdating);
        }
        let batch = Uuid::new_v4();
        if self.jobs.try_send(Job::Rescan(library, batch)).is_err() {
            self.rescanning.store(false, Ordering::SeqCst);
            return Err(Error::AlreadyUpdating);
        }
        Ok(())
    }

    /// Busy/idle transition stream. May be taken once.
    pub fn take_events(&self) -> mpsc::Receiver<bool> {
        self.events
            .lock()
            .unwrap()
            .take()
            .expect("image batch event stream already taken")
    }

    /// Cancel in-flight work and wait for the worker to drain.
    pub async fn shutdown(&self) {
        let _ = self.cancel.send(true);
        let worker = self.worker.lock().unwrap().take();
        if let Some(worker) = worker {
            let _ = worker.await;
        }
    }
}

async fn worker_loop(
    providers: Vec<Arc<dyn ImageProvider>>,
    mut jobs: mpsc::Receiver<Job>,
    events: mpsc::Sender<bool>,
    rescanning: Arc<AtomicBool>,
    mut cancel: watch::Receiver<bool>,
) {
    loop {
        let job = tokio::select! {
            _ = cancel.changed() => return,
            job = jobs.recv() => match job {
                Some(job) => job,
                None => return,
            },
        };
        let _ = events.send(true).await;
        let mut next = Some(job);
        while let Some(job) = next.take() {
            run_job(&providers, job, &rescanning, &cancel).await;
            if *cancel.borrow() {
                return;
            }
            next = jobs.try_recv().ok();
        }
        let _ = events.send(false).await;
    }
}

async fn run_job(
    providers: &[Arc<dyn ImageProvider>],
    job: Job,
    rescanning: &AtomicBool,
    cancel: &watch::Receiver<bool>,
) {
    match job {
        Job::Update(songs) => {
            for song in &songs {
                if *cancel.borrow() {
                    return;
                }
                for provider in providers {
                    if let Err(err) = provider.update(song).await {
                        warn!(%err, "cover resolution failed");
                    }
                }
            }
        }
        Job::Rescan(songs, batch) => {
            for song in &songs {
                if *cancel.borrow() {
                    break;
                }
                for provider in providers {
                    if let Err(err) = provider.rescan(song, batch).await {
                        warn!(%err, "cover rescan failed");
                    }
                }
            }
            rescanning.store(false, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct RecordingProvider {
        urls: Vec<String>,
        complete: bool,
        fail: bool,
        updates: Mutex<Vec<String>>,
        rescans: Mutex<Vec<String>>,
    }

    impl RecordingProvider {
        fn new(urls: &[&str], complete: bool) -> Arc<Self> {
            Arc::new(Self {
                urls: urls.iter().map(|s| s.to_string()).collect(),
                complete,
                fail: false,
                updates: Mutex::new(Vec::new()),
                rescans: Mutex::new(Vec::new()),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                urls: Vec::new(),
                complete: true,
                fail: true,
                updates: Mutex::new(Vec::new()),
                rescans: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ImageProvider for RecordingProvider {
        async fn update(&self, song: &Song) -> Result<()> {
            self.updates
                .lock()
                .unwrap()
                .push(crate::song::first(song, "file").to_string());
            if self.fail {
                return Err(Error::BadRequest("provider offline".to_string()));
            }
            Ok(())
        }

        async fn rescan(&self, song: &Song, _batch: Uuid) -> Result<()> {
            self.rescans
                .lock()
                .unwrap()
                .push(crate::song::first(song, "file").to_string());
            if self.fail {
                return Err(Error::BadRequest("provider offline".to_string()));
            }
            Ok(())
        }

        fn get_urls(&self, _song: &Song) -> (Vec<String>, bool) {
            (self.urls.clone(), self.complete)
        }
    }

    fn song(file: &str) -> Song {
        Song::from([("file".to_string(), vec![file.to_string()])])
    }

    #[tokio::test]
    async fn test_get_urls_union() {
        let a = RecordingProvider::new(&["/covers/a.jpg"], true);
        let b = RecordingProvider::new(&["http://example.com/a.jpg"], false);
        let batch = ImageBatch::new(vec![a, b]);
        let (urls, complete) = batch.get_urls(&song("a.mp3"));
        assert_eq!(urls, vec!["/covers/a.jpg", "http://example.com/a.jpg"]);
        assert!(!complete);
        batch.shutdown().await;
    }

    #[tokio::test]
    async fn test_update_emits_busy_then_idle() {
        let provider = RecordingProvider::new(&[], true);
        let batch = ImageBatch::new(vec![provider.clone()]);
        let mut events = batch.take_events();
        batch.update(vec![song("a.mp3"), song("b.mp3")]);
        assert_eq!(events.recv().await, Some(true));
        assert_eq!(events.recv().await, Some(false));
        let updates = provider.updates.lock().unwrap().clone();
        assert_eq!(updates, vec!["a.mp3", "b.mp3"]);
        batch.shutdown().await;
    }

    #[tokio::test]
    async fn test_provider_failure_does_not_short_circuit() {
        let bad = RecordingProvider::failing();
        let good = RecordingProvider::new(&[], true);
        let batch = ImageBatch::new(vec![bad, good.clone()]);
        let mut events = batch.take_events();
        batch.update(vec![song("a.mp3")]);
        assert_eq!(events.recv().await, Some(true));
        assert_eq!(events.recv().await, Some(false));
        assert_eq!(good.updates.lock().unwrap().len(), 1);
        batch.shutdown().await;
    }

    #[tokio::test]
    async fn test_rescan_single_flight() {
        let provider = RecordingProvider::new(&[], true);
        let batch = ImageBatch::new(vec![provider.clone()]);
        let mut events = batch.take_events();
        batch.rescan(vec![song("a.mp3")]).unwrap();
        // the first rescan is still queued or running
        assert!(matches!(
            batch.rescan(vec![song("a.mp3")]),
            Err(Error::AlreadyUpdating)
        ));
        assert_eq!(events.recv().await, Some(true));
        assert_eq!(events.recv().await, Some(false));
        // idle again: a new rescan is accepted
        batch.rescan(vec![song("b.mp3")]).unwrap();
        assert_eq!(events.recv().await, Some(true));
        assert_eq!(events.recv().await, Some(false));
        let rescans = provider.rescans.lock().unwrap().clone();
        assert_eq!(rescans, vec!["a.mp3", "b.mp3"]);
        batch.shutdown().await;
    }
}
