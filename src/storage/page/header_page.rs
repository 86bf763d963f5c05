use crate::common::{KeelError, PageId, Result, PAGE_SIZE};

use super::btree_page::{read_u32, write_u32};

/// Bytes reserved for an index name within a header record
pub const HEADER_NAME_SIZE: usize = 32;

const RECORD_SIZE: usize = HEADER_NAME_SIZE + 4;
const OFFSET_RECORD_COUNT: usize = 0;
const RECORDS_START: usize = 4;

/// Maximum number of (name, root page id) records the header page holds
pub const HEADER_MAX_RECORDS: usize = (PAGE_SIZE - RECORDS_START) / RECORD_SIZE;

/// View of the reserved page 0, which stores one (index-name, root-page-id)
/// record per B+Tree index. A freshly zeroed page is a valid empty header.
pub struct HeaderPage<'a> {
    data: &'a mut [u8],
}

impl<'a> HeaderPage<'a> {
    pub fn new(data: &'a mut [u8]) -> Self {
        assert_eq!(data.len(), PAGE_SIZE);
        Self { data }
    }

    pub fn record_count(&self) -> usize {
        read_u32(self.data, OFFSET_RECORD_COUNT) as usize
    }

    fn set_record_count(&mut self, count: usize) {
        write_u32(self.data, OFFSET_RECORD_COUNT, count as u32);
    }

    fn record_offset(index: usize) -> usize {
        RECORDS_START + index * RECORD_SIZE
    }

    fn name_at(&self, index: usize) -> &str {
        let offset = Self::record_offset(index);
        let raw = &self.data[offset..offset + HEADER_NAME_SIZE];
        let end = raw.iter().position(|&b| b == 0).unwrap_or(HEADER_NAME_SIZE);
        std::str::from_utf8(&raw[..end]).unwrap_or("")
    }

    fn find(&self, name: &str) -> Option<usize> {
        (0..self.record_count()).find(|&i| self.name_at(i) == name)
    }

    /// Inserts a new record. Fails when the page is full or the name does
    /// not fit; an existing record of the same name is updated instead.
    pub fn insert_record(&mut self, name: &str, root_page_id: PageId) -> Result<()> {
        assert!(
            name.len() < HEADER_NAME_SIZE,
            "index name too long for header record"
        );
        if let Some(index) = self.find(name) {
            self.write_record(index, name, root_page_id);
            return Ok(());
        }

        let count = self.record_count();
        if count >= HEADER_MAX_RECORDS {
            return Err(KeelError::HeaderPageFull);
        }
        self.write_record(count, name, root_page_id);
        self.set_record_count(count + 1);
        Ok(())
    }

    /// Updates an existing record.
    pub fn update_record(&mut self, name: &str, root_page_id: PageId) -> Result<()> {
        match self.find(name) {
            Some(index) => {
                self.write_record(index, name, root_page_id);
                Ok(())
            }
            None => Err(KeelError::IndexNotFound(name.to_string())),
        }
    }

    /// Removes a record, compacting the tail over it.
    pub fn delete_record(&mut self, name: &str) -> Result<()> {
        let Some(index) = self.find(name) else {
            return Err(KeelError::IndexNotFound(name.to_string()));
        };
        let count = self.record_count();
        let start = Self::record_offset(index + 1);
        let end = Self::record_offset(count);
        let dst = Self::record_offset(index);
        self.data.copy_within(start..end, dst);
        self.set_record_count(count - 1);
        Ok(())
    }

    /// Root page id recorded for `name`, if any.
    pub fn get_root_id(&self, name: &str) -> Option<PageId> {
        self.find(name).map(|index| {
            let offset = Self::record_offset(index) + HEADER_NAME_SIZE;
            PageId::new(read_u32(self.data, offset))
        })
    }

    fn write_record(&mut self, index: usize, name: &str, root_page_id: PageId) {
        let offset = Self::record_offset(index);
        self.data[offset..offset + HEADER_NAME_SIZE].fill(0);
        self.data[offset..offset + name.len()].copy_from_slice(name.as_bytes());
        write_u32(
            self.data,
            offset + HEADER_NAME_SIZE,
            root_page_id.as_u32(),
        );
    }
}
