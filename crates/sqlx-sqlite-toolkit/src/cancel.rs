//! Cooperative cancellation of in-flight operations

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::{Error, Result};

/// Shared flag a caller sets to abandon a running query.
///
/// The dispatcher checks it before a query starts and between rows. Nothing
/// is interrupted preemptively; a statement that is not iterating rows runs
/// to completion.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
   pub fn new() -> Self {
      Self::default()
   }

   pub fn cancel(&self) {
      self.0.store(true, Ordering::Release);
   }

   pub fn is_canceled(&self) -> bool {
      self.0.load(Ordering::Acquire)
   }

   /// `Err(Error::Canceled)` once the flag is set.
   pub(crate) fn check(&self) -> Result<()> {
      if self.is_canceled() {
         return Err(Error::Canceled);
      }
      Ok(())
   }
}
