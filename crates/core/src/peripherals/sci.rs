//! Serial communications interface (SCI).
//!
//! Only the register-level handshake is modelled: no baud-rate timing,
//! no framing. The host bridge injects received bytes with
//! [`Sci::host_push`] and collects transmitted bytes with
//! [`Sci::host_pull`]. Both registers hold a single byte, so the status
//! flags double as the back-pressure signal:
//!
//! - RDRF set: a byte waits in RDR, further pushes are rejected
//! - TDRE clear: a byte waits in TDR for the host to take it

pub const RMCR: u16 = 0x10;
pub const TRCSR: u16 = 0x11;
pub const RDR: u16 = 0x12;
pub const TDR: u16 = 0x13;

/// Receive data register full
pub const TRCSR_RDRF: u8 = 0x80;
/// Overrun or framing error
pub const TRCSR_ORFE: u8 = 0x40;
/// Transmit data register empty
pub const TRCSR_TDRE: u8 = 0x20;
/// Receive interrupt enable
pub const TRCSR_RIE: u8 = 0x10;
/// Receive enable
pub const TRCSR_RE: u8 = 0x08;
/// Transmit interrupt enable
pub const TRCSR_TIE: u8 = 0x04;
/// Transmit enable
pub const TRCSR_TE: u8 = 0x02;
/// Wake-up
pub const TRCSR_WU: u8 = 0x01;

const STATUS_MASK: u8 = TRCSR_RDRF | TRCSR_ORFE | TRCSR_TDRE;

pub struct Sci {
    trcsr: u8,
    rmcr: u8,
    rdr: u8,
    tdr: u8,
    // Debug counters
    pub dbg_rx_bytes: u64,
    pub dbg_tx_bytes: u64,
    pub dbg_overruns: u64,
}

impl Sci {
    pub fn new() -> Self {
        Sci {
            trcsr: TRCSR_TDRE,
            rmcr: 0,
            rdr: 0,
            tdr: 0,
            dbg_rx_bytes: 0,
            dbg_tx_bytes: 0,
            dbg_overruns: 0,
        }
    }

    /// Return the registers to their reset state. Debug counters survive.
    pub fn reset(&mut self) {
        *self = Sci {
            dbg_rx_bytes: self.dbg_rx_bytes,
            dbg_tx_bytes: self.dbg_tx_bytes,
            dbg_overruns: self.dbg_overruns,
            ..Sci::new()
        };
    }

    /// Offer a received byte. Rejected with the byte handed back while the
    /// previous one has not been read by the program.
    pub fn host_push(&mut self, byte: u8) -> Result<(), u8> {
        if self.trcsr & TRCSR_RDRF != 0 {
            return Err(byte);
        }
        self.rdr = byte;
        self.trcsr |= TRCSR_RDRF;
        self.dbg_rx_bytes += 1;
        Ok(())
    }

    /// Take the byte the program wrote to TDR, if any.
    pub fn host_pull(&mut self) -> Option<u8> {
        if self.trcsr & TRCSR_TDRE != 0 {
            return None;
        }
        self.trcsr |= TRCSR_TDRE;
        self.dbg_tx_bytes += 1;
        Some(self.tdr)
    }

    /// Record that a received byte was lost before reaching RDR.
    pub fn signal_overrun(&mut self) {
        self.trcsr |= TRCSR_ORFE;
        self.dbg_overruns += 1;
    }

    /// True while RDR holds an unread byte.
    pub fn rx_full(&self) -> bool {
        self.trcsr & TRCSR_RDRF != 0
    }

    /// True while TDR holds a byte the host has not pulled.
    pub fn tx_pending(&self) -> bool {
        self.trcsr & TRCSR_TDRE == 0
    }

    pub fn trcsr(&self) -> u8 {
        self.trcsr
    }

    /// Receive or transmit interrupt request
    pub fn irq_pending(&self) -> bool {
        let rx = self.trcsr & (TRCSR_RDRF | TRCSR_ORFE) != 0 && self.trcsr & TRCSR_RIE != 0;
        let tx = self.trcsr & TRCSR_TDRE != 0 && self.trcsr & TRCSR_TIE != 0;
        rx || tx
    }

    pub fn read(&mut self, addr: u16) -> Option<u8> {
        match addr {
            RMCR => Some(self.rmcr),
            TRCSR => Some(self.trcsr),
            RDR => {
                self.trcsr &= !(TRCSR_RDRF | TRCSR_ORFE);
                Some(self.rdr)
            }
            TDR => Some(self.tdr),
            _ => None,
        }
    }

    pub fn peek(&self, addr: u16) -> Option<u8> {
        match addr {
            RMCR => Some(self.rmcr),
            TRCSR => Some(self.trcsr),
            RDR => Some(self.rdr),
            TDR => Some(self.tdr),
            _ => None,
        }
    }

    pub fn write(&mut self, addr: u16, value: u8) -> bool {
        match addr {
            RMCR => self.rmcr = value,
            TRCSR => self.trcsr = (self.trcsr & STATUS_MASK) | (value & !STATUS_MASK),
            TDR => {
                self.tdr = value;
                self.trcsr &= !TRCSR_TDRE;
            }
            RDR => {}
            _ => return false,
        }
        true
    }
}

impl Default for Sci {
    fn default() -> Self {
        Self::new()
    }
}
