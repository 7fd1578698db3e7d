use std::fmt;
use std::ops::Range;
use std::str::FromStr;

use crate::address::{AddressTranslator, Pbn, PhysicalAddress, Ppn};
use crate::error::Error;

/// A primitive flash command.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operation {
    Read,
    Write,
    Erase,
}

impl Operation {
    /// Erase works on whole blocks; read and write work on pages.
    pub fn is_block_operation(self) -> bool {
        self == Operation::Erase
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Operation::Read => "read",
            Operation::Write => "write",
            Operation::Erase => "erase",
        })
    }
}

impl FromStr for Operation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "read" => Ok(Operation::Read),
            "write" => Ok(Operation::Write),
            "erase" => Ok(Operation::Erase),
            _ => Err(Error::UnknownOperation(s.to_string())),
        }
    }
}

/// One physical operation on one physical address.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FlashRequest {
    operation: Operation,
    address: PhysicalAddress,
}

impl FlashRequest {
    /// Panics if the address granularity does not match the operation.
    pub fn new(operation: Operation, address: PhysicalAddress) -> Self {
        assert_eq!(
            operation.is_block_operation(),
            address.is_block_address(),
            "{operation} issued on a {} address",
            if address.is_block_address() { "block" } else { "page" }
        );
        Self { operation, address }
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    pub fn address(&self) -> &PhysicalAddress {
        &self.address
    }

    pub fn channel(&self) -> usize {
        self.address.channel
    }
}

impl fmt::Display for FlashRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "OPERATION {}", self.operation)?;
        write!(f, "{}", self.address)
    }
}

pub fn display_requests(requests: &[FlashRequest]) -> String {
    requests
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

/// A run of `count` consecutive pages to read or write.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PageRangeRequest {
    pub start: Ppn,
    pub count: usize,
    pub operation: Operation,
}

impl PageRangeRequest {
    pub fn new(start: Ppn, count: usize, operation: Operation) -> Self {
        assert!(
            !operation.is_block_operation(),
            "page ranges cannot be erased"
        );
        Self {
            start,
            count,
            operation,
        }
    }

    pub fn range(&self) -> Range<Ppn> {
        self.start..self.start + self.count
    }

    pub fn requests(&self, translator: &AddressTranslator) -> Vec<FlashRequest> {
        self.range()
            .map(|page| FlashRequest::new(self.operation, translator.page_to_address(page)))
            .collect()
    }
}

/// A run of `count` consecutive blocks to erase.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockRangeRequest {
    pub start: Pbn,
    pub count: usize,
    pub operation: Operation,
}

impl BlockRangeRequest {
    pub fn new(start: Pbn, count: usize, operation: Operation) -> Self {
        assert!(
            operation.is_block_operation(),
            "block ranges can only be erased, not {operation}"
        );
        Self {
            start,
            count,
            operation,
        }
    }

    pub fn range(&self) -> Range<Pbn> {
        self.start..self.start + self.count
    }

    pub fn requests(&self, translator: &AddressTranslator) -> Vec<FlashRequest> {
        self.range()
            .map(|block| FlashRequest::new(self.operation, translator.block_to_address(block)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FlashConfig;

    fn translator() -> AddressTranslator {
        AddressTranslator::new(FlashConfig::default().geometry().unwrap())
    }

    #[test]
    fn operation_names_parse() {
        assert_eq!("read".parse::<Operation>().unwrap(), Operation::Read);
        assert_eq!("WRITE".parse::<Operation>().unwrap(), Operation::Write);
        assert_eq!("Erase".parse::<Operation>().unwrap(), Operation::Erase);
        assert!(matches!(
            "trim".parse::<Operation>(),
            Err(Error::UnknownOperation(name)) if name == "trim"
        ));
    }

    #[test]
    fn page_range_expands_per_page() {
        let t = translator();
        let range = PageRangeRequest::new(126, 4, Operation::Write);
        assert_eq!(range.range(), 126..130);
        let requests = range.requests(&t);
        assert_eq!(requests.len(), 4);
        let channels: Vec<_> = requests.iter().map(FlashRequest::channel).collect();
        assert_eq!(channels, vec![0, 0, 1, 1]);
        assert!(requests.iter().all(|r| r.operation() == Operation::Write));
    }

    #[test]
    fn block_range_expands_per_block() {
        let t = translator();
        let requests = BlockRangeRequest::new(1, 3, Operation::Erase).requests(&t);
        assert_eq!(requests.len(), 3);
        assert!(requests.iter().all(|r| r.address().page.is_none()));
        assert_eq!(
            requests.iter().map(|r| r.address().block).collect::<Vec<_>>(),
            vec![1, 0, 1]
        );
    }

    #[test]
    fn display_lists_each_request() {
        let t = translator();
        let requests = PageRangeRequest::new(0, 2, Operation::Read).requests(&t);
        let text = display_requests(&requests);
        assert_eq!(text.matches("OPERATION read").count(), 2);
    }

    #[test]
    #[should_panic(expected = "page ranges cannot be erased")]
    fn erasing_pages_panics() {
        PageRangeRequest::new(0, 1, Operation::Erase);
    }

    #[test]
    #[should_panic(expected = "block ranges can only be erased")]
    fn writing_blocks_panics() {
        BlockRangeRequest::new(0, 1, Operation::Write);
    }

    #[test]
    #[should_panic(expected = "erase issued on a page address")]
    fn erase_needs_a_block_address() {
        let t = translator();
        FlashRequest::new(Operation::Erase, t.page_to_address(0));
    }
}
