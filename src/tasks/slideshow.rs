//! Timer-driven advance → decode → present.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::catalog::Catalog;
use crate::processing::decode::Compositor;
use crate::render::panel::Panel;
use crate::render::presenter::Presenter;
use crate::storage::Storage;

/// What one tick did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Zero entries, or a single entry already on screen.
    Idle,
    /// Interval not yet elapsed, or a hold is in effect.
    Waiting,
    Presented(String),
    /// Decode or paint failed; the previous frame stays up.
    Skipped(String),
}

#[derive(Debug)]
pub struct Slideshow {
    interval: Duration,
    last_presented_at: Option<Instant>,
    show_current: bool,
    held_until: Option<Instant>,
}

impl Slideshow {
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_presented_at: None,
            show_current: true,
            held_until: None,
        }
    }

    /// Present `current()` on the next tick without advancing. Called after
    /// every catalog rebuild.
    pub fn restart(&mut self) {
        self.show_current = true;
        self.held_until = None;
    }

    /// Leave whatever is on the panel untouched for one full interval.
    pub fn hold(&mut self) {
        self.held_until = Some(Instant::now() + self.interval);
    }

    #[must_use]
    pub fn last_presented_at(&self) -> Option<Instant> {
        self.last_presented_at
    }

    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub async fn tick<P: Panel>(
        &mut self,
        catalog: &mut Catalog,
        compositor: &mut Compositor,
        storage: &dyn Storage,
        presenter: &mut Presenter<P>,
    ) -> TickOutcome {
        if catalog.is_empty() {
            self.show_current = false;
            return TickOutcome::Idle;
        }
        if self.held_until.is_some_and(|until| Instant::now() < until) {
            return TickOutcome::Waiting;
        }
        self.held_until = None;

        let identifier = if self.show_current {
            self.show_current = false;
            catalog.current().map(str::to_owned)
        } else {
            if catalog.len() < 2 {
                return TickOutcome::Idle;
            }
            let due = self
                .last_presented_at
                .is_none_or(|at| at.elapsed() >= self.interval);
            if !due {
                return TickOutcome::Waiting;
            }
            catalog.advance().map(str::to_owned)
        };
        let Some(identifier) = identifier else {
            return TickOutcome::Idle;
        };

        // Stamp before the work so a bad entry cannot stall the schedule.
        self.last_presented_at = Some(Instant::now());

        let image = match compositor.decode(storage, &identifier).await {
            Ok(image) => image,
            Err(err) => {
                warn!(%identifier, error = %err, "skipping image");
                return TickOutcome::Skipped(identifier);
            }
        };
        if let Err(err) = presenter.present(image) {
            warn!(%identifier, error = ?err, "failed to paint image");
            return TickOutcome::Skipped(identifier);
        }
        if catalog.len() == 1 {
            info!(%identifier, "single image; slideshow idle");
        } else {
            debug!(%identifier, cursor = catalog.cursor(), "presented");
        }
        TickOutcome::Presented(identifier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::SequenceMode;
    use crate::render::panel::Framebuffer;
    use crate::storage::DirStorage;

    #[tokio::test(start_paused = true)]
    async fn empty_catalog_is_idle() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = DirStorage::mount(tmp.path()).unwrap();
        let mut catalog = Catalog::new(SequenceMode::Ascending, None);
        let mut compositor = Compositor::new(1 << 20);
        let mut presenter = Presenter::new(Framebuffer::new(8, 8));
        let mut slideshow = Slideshow::new(Duration::from_secs(1));

        let outcome = slideshow
            .tick(&mut catalog, &mut compositor, &storage, &mut presenter)
            .await;
        assert_eq!(outcome, TickOutcome::Idle);
        assert!(presenter.panel().ops().is_empty());
        assert!(slideshow.last_presented_at().is_none());
    }
}
