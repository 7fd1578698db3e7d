use rand::Rng as _;
use thiserror::Error;

use crate::address::{Pbn, Ppn, UNINIT_PPN};
use crate::flash::{PageState, SimulatedNandFlash, StuckBit};
use crate::transaction::Transaction;

/// Data-plane store behind the metered controller.
///
/// It owns page contents and validity checks; the controller never looks at
/// the data it moves.
pub trait FlashBackend {
    /// Caller-supplied label attached to every operation.
    type Tag: Clone;
    type Error: std::error::Error;

    fn page_read(&mut self, ppn: Ppn, tag: Self::Tag) -> Result<Option<Vec<u8>>, Self::Error>;
    fn page_write(
        &mut self,
        ppn: Ppn,
        tag: Self::Tag,
        data: Option<&[u8]>,
    ) -> Result<(), Self::Error>;
    fn block_erase(&mut self, pbn: Pbn, tag: Self::Tag) -> Result<(), Self::Error>;
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("page {0} is outside the flash")]
    PageOutOfRange(Ppn),
    #[error("block {0} is outside the flash")]
    BlockOutOfRange(Pbn),
    #[error("page {0} must be erased before it is programmed again")]
    ProgramWithoutErase(Ppn),
    #[error("{len} bytes do not fit a {page_size} byte page")]
    DataTooLarge { len: usize, page_size: usize },
}

impl<O: Clone> FlashBackend for SimulatedNandFlash<O> {
    type Tag = O;
    type Error = BackendError;

    fn page_read(&mut self, ppn: Ppn, tag: O) -> Result<Option<Vec<u8>>, BackendError> {
        if ppn == UNINIT_PPN {
            return Ok(None);
        }
        let state = self.pages.get(ppn).ok_or(BackendError::PageOutOfRange(ppn))?;
        let data = match state {
            PageState::Programmed(Some(data)) => {
                let mut data = data.clone();
                for bit in self.stuck_bits.get(&ppn).into_iter().flatten() {
                    bit.apply(&mut data);
                }
                Some(data)
            }
            _ => None,
        };

        self.record(Transaction::read(self.log_level, ppn, data.as_deref(), tag));
        self.pages_read += 1;
        self.bytes_read += self.page_size;
        Ok(data)
    }

    fn page_write(&mut self, ppn: Ppn, tag: O, data: Option<&[u8]>) -> Result<(), BackendError> {
        let page_size = self.page_size;
        let state = self
            .pages
            .get_mut(ppn)
            .ok_or(BackendError::PageOutOfRange(ppn))?;
        if *state != PageState::Erased {
            return Err(BackendError::ProgramWithoutErase(ppn));
        }
        if let Some(data) = data {
            if data.len() > page_size {
                return Err(BackendError::DataTooLarge {
                    len: data.len(),
                    page_size,
                });
            }
        }
        *state = PageState::Programmed(data.map(<[u8]>::to_vec));

        self.record(Transaction::write(self.log_level, ppn, data, tag));
        self.pages_written += 1;
        self.bytes_written += page_size;
        Ok(())
    }

    fn block_erase(&mut self, pbn: Pbn, tag: O) -> Result<(), BackendError> {
        if pbn >= self.block_cycles.len() {
            return Err(BackendError::BlockOutOfRange(pbn));
        }
        let pages = self.block_pages(pbn);

        self.block_cycles[pbn] += 1;
        let cycles = self.block_cycles[pbn];
        if cycles > self.minimum_safe_erase_cycles
            && (cycles - self.minimum_safe_erase_cycles) % self.bit_failure_every_x_erases == 0
        {
            // Wear out a random bit of a random page in this block
            let ppn = self.rng.random_range(pages.clone());
            let bit = StuckBit {
                offset: self.rng.random_range(0..self.page_size),
                mask: 1 << self.rng.random_range(0..8u32),
                stuck_at_one: self.rng.random::<bool>(),
            };
            self.stuck_bits.entry(ppn).or_default().push(bit);
        }

        let before = self.pages[pages.clone()].iter().map(|page| match page {
            PageState::Programmed(Some(data)) => Some(data.as_slice()),
            _ => None,
        });
        let transaction = Transaction::erase(self.log_level, pbn, before, tag);
        self.record(transaction);
        self.pages[pages].fill(PageState::Erased);
        self.blocks_erased += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FlashConfig;
    use crate::flash::SimulatedNandFlashBuilder;
    use crate::transaction::TransactionLogLevel;

    fn flash(level: TransactionLogLevel) -> SimulatedNandFlash<&'static str> {
        let geometry = FlashConfig::default().geometry().unwrap();
        SimulatedNandFlashBuilder::new(&geometry)
            .with_logging(level)
            .with_rng_seed(1)
            .build()
    }

    #[test]
    fn written_data_reads_back() {
        let mut flash = flash(TransactionLogLevel::None);
        flash.page_write(10, "w", Some(&b"hello"[..])).unwrap();
        assert_eq!(flash.page_read(10, "r").unwrap().as_deref(), Some(&b"hello"[..]));
        assert_eq!(flash.page_read(11, "r").unwrap(), None);
        assert_eq!(flash.pages_written(), 1);
        assert_eq!(flash.pages_read(), 2);
        assert_eq!(flash.bytes_read(), 2 * 2048);
    }

    #[test]
    fn programming_twice_needs_an_erase() {
        let mut flash = flash(TransactionLogLevel::None);
        flash.page_write(70, "w", None).unwrap();
        assert_eq!(
            flash.page_write(70, "w", None),
            Err(BackendError::ProgramWithoutErase(70))
        );
        flash.block_erase(1, "e").unwrap();
        assert!(!flash.is_programmed(70));
        flash.page_write(70, "w", Some(&[1u8, 2, 3][..])).unwrap();
        assert_eq!(flash.block_erase_cycles()[1], 1);
    }

    #[test]
    fn uninitialized_pages_read_as_nothing() {
        let mut flash = flash(TransactionLogLevel::Minimal);
        assert_eq!(flash.page_read(UNINIT_PPN, "r").unwrap(), None);
        assert!(flash.transactions().is_empty());
    }

    #[test]
    fn out_of_range_addresses_are_rejected() {
        let mut flash = flash(TransactionLogLevel::None);
        assert_eq!(
            flash.page_write(2048, "w", None),
            Err(BackendError::PageOutOfRange(2048))
        );
        assert_eq!(flash.block_erase(32, "e"), Err(BackendError::BlockOutOfRange(32)));
        assert!(matches!(
            flash.page_write(0, "w", Some(vec![0u8; 4096].as_slice())),
            Err(BackendError::DataTooLarge {
                len: 4096,
                page_size: 2048
            })
        ));
    }

    #[test]
    fn full_logging_keeps_erased_contents() {
        let mut flash = flash(TransactionLogLevel::Full);
        flash.page_write(0, "w", Some(&[7u8][..])).unwrap();
        flash.block_erase(0, "gc").unwrap();
        match flash.transactions().last().unwrap() {
            Transaction::Erase { tag, pbn, data } => {
                assert_eq!(*tag, "gc");
                assert_eq!(*pbn, 0);
                let data = data.as_ref().unwrap();
                assert_eq!(data.len(), 64);
                assert_eq!(data[0].as_deref(), Some(&[7u8][..]));
                assert!(data[1..].iter().all(Option::is_none));
            }
            other => panic!("unexpected transaction {other:?}"),
        }
        assert_eq!(flash.snapshot().last_tag.as_deref(), Some("gc"));
    }

    #[test]
    fn minimal_logging_drops_payloads() {
        let mut flash = flash(TransactionLogLevel::Minimal);
        flash.page_write(3, "w", Some(&[1u8][..])).unwrap();
        assert_eq!(
            flash.transactions(),
            &[Transaction::Write {
                tag: "w",
                ppn: 3,
                data: None
            }]
        );
    }

    #[test]
    fn worn_blocks_grow_stuck_bits() {
        let geometry = FlashConfig::default().geometry().unwrap();
        let mut flash: SimulatedNandFlash<()> = SimulatedNandFlashBuilder::new(&geometry)
            .with_minimum_erase_cycles(2)
            .with_failure_rate(1)
            .with_rng_seed(42)
            .build();
        for _ in 0..2 {
            flash.block_erase(0, ()).unwrap();
        }
        assert_eq!(flash.stuck_bit_count(), 0);
        for _ in 0..3 {
            flash.block_erase(0, ()).unwrap();
        }
        assert_eq!(flash.stuck_bit_count(), 3);
        assert!(flash.stuck_bits.keys().all(|ppn| *ppn < 64));

        flash.reset_stats();
        assert_eq!(flash.blocks_erased(), 0);
        assert_eq!(flash.block_erase_cycles()[0], 5);
        assert_eq!(flash.stuck_bit_count(), 3);

        flash.reset();
        assert_eq!(flash.stuck_bit_count(), 0);
        assert_eq!(flash.block_erase_cycles()[0], 0);
    }

    #[test]
    fn stuck_bits_corrupt_reads() {
        let geometry = FlashConfig::default().geometry().unwrap();
        let mut flash: SimulatedNandFlash<()> = SimulatedNandFlash::new(&geometry);
        flash.stuck_bits.insert(
            5,
            vec![
                StuckBit {
                    offset: 0,
                    mask: 0x01,
                    stuck_at_one: true,
                },
                StuckBit {
                    offset: 1,
                    mask: 0x80,
                    stuck_at_one: false,
                },
            ],
        );
        flash.page_write(5, (), Some(&[0x00u8, 0xff][..])).unwrap();
        assert_eq!(flash.page_read(5, ()).unwrap(), Some(vec![0x01, 0x7f]));
    }
}
