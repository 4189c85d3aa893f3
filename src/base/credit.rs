use serde::Serialize;

use crate::error::{SimError, SimResult};

/// Sender-side view of a credit link.  Credits are granted by the receiver (its free capacity)
/// and spent one per request sent; the sender may only transmit while it holds one.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct CreditCounter {
    #[serde(skip)]
    owner: &'static str,
    credits: u32,
    granted: u64,
    consumed: u64,
}

impl CreditCounter {
    pub fn new(owner: &'static str) -> Self {
        Self {
            owner,
            ..Self::default()
        }
    }

    pub fn available(&self) -> u32 {
        self.credits
    }

    pub fn has_credit(&self) -> bool {
        self.credits > 0
    }

    pub fn granted(&self) -> u64 {
        self.granted
    }

    pub fn consumed(&self) -> u64 {
        self.consumed
    }

    pub fn grant(&mut self, count: u32) -> SimResult<()> {
        self.credits = self.credits.checked_add(count).ok_or_else(|| {
            SimError::protocol(self.owner, format!("credit count overflow granting {count}"))
        })?;
        self.granted = self.granted.saturating_add(count as u64);
        Ok(())
    }

    /// Spend one credit.  Spending at zero means the sender broke the credit discipline.
    pub fn consume(&mut self) -> SimResult<()> {
        if self.credits == 0 {
            return Err(SimError::protocol(self.owner, "sent a request without a credit"));
        }
        self.credits -= 1;
        self.consumed = self.consumed.saturating_add(1);
        Ok(())
    }
}
