use panel_framework::PanelError;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

/// Visibility and in-flight state of one confirmation modal.
#[derive(Debug, Default)]
pub struct Modal {
    open: AtomicBool,
    busy: AtomicBool,
}

impl Modal {
    pub fn open(&self) {
        self.open.store(true, Ordering::SeqCst);
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    /// Claims the modal for one mutation. Fails while another is awaiting settlement.
    pub fn acquire(&self) -> Result<ModalGuard<'_>, PanelError> {
        self.busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| PanelError::MutationInFlight)?;
        Ok(ModalGuard { modal: self })
    }
}

/// Closes the modal and releases it when dropped, on every exit path.
#[must_use = "the modal is released as soon as the guard is dropped"]
pub struct ModalGuard<'m> {
    modal: &'m Modal,
}

impl Drop for ModalGuard<'_> {
    fn drop(&mut self) {
        self.modal.open.store(false, Ordering::SeqCst);
        self.modal.busy.store(false, Ordering::SeqCst);
        debug!("Modal closed");
    }
}
