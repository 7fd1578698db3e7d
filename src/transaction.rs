use crate::address::{Pbn, Ppn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionLogLevel {
    /// No transaction logging
    None,
    /// Log only the operation, tag and address
    Minimal,
    /// Log data for write transactions => fully reconstructible
    WriteDataOnly,
    /// Log data for read and write transactions
    ReadWriteData,
    /// Log all transaction data including block contents before erase
    Full,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transaction<O = ()> {
    Read {
        tag: O,
        ppn: Ppn,
        data: Option<Vec<u8>>,
    },
    Write {
        tag: O,
        ppn: Ppn,
        data: Option<Vec<u8>>,
    },
    Erase {
        tag: O,
        pbn: Pbn,
        /// Contents of each page of the block before it was erased.
        data: Option<Vec<Option<Vec<u8>>>>,
    },
}

impl<O> Transaction<O> {
    pub fn read(level: TransactionLogLevel, ppn: Ppn, data: Option<&[u8]>, tag: O) -> Self {
        let data = match level {
            TransactionLogLevel::ReadWriteData | TransactionLogLevel::Full => {
                data.map(<[u8]>::to_vec)
            }
            _ => None,
        };
        Transaction::Read { tag, ppn, data }
    }

    pub fn write(level: TransactionLogLevel, ppn: Ppn, data: Option<&[u8]>, tag: O) -> Self {
        let data = match level {
            TransactionLogLevel::WriteDataOnly
            | TransactionLogLevel::ReadWriteData
            | TransactionLogLevel::Full => data.map(<[u8]>::to_vec),
            _ => None,
        };
        Transaction::Write { tag, ppn, data }
    }

    pub fn erase<'a>(
        level: TransactionLogLevel,
        pbn: Pbn,
        before: impl Iterator<Item = Option<&'a [u8]>>,
        tag: O,
    ) -> Self {
        let data = match level {
            TransactionLogLevel::Full => {
                Some(before.map(|page| page.map(<[u8]>::to_vec)).collect())
            }
            _ => None,
        };
        Transaction::Erase { tag, pbn, data }
    }

    pub fn tag(&self) -> &O {
        match self {
            Transaction::Read { tag, .. }
            | Transaction::Write { tag, .. }
            | Transaction::Erase { tag, .. } => tag,
        }
    }
}
