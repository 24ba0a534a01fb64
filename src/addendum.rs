use crate::app::Logger;
use crate::csv::{CsvEntry, CsvEntryParser, CsvError};
use crate::http::{open_server_file, request_url, HttpClient, ResponseBlockReader};
use crate::ring::{MarkOrigin, RingBuffer};
use crate::traffic::{LedTable, MergeOutcome};
use crate::{Error, Result};

pub const ADDENDUM_FOLDER_SUFFIX: &str = "_add";
pub const ADDENDUM_EXTENSION: &str = ".add";
pub const DEFAULT_FIRST_ADDENDUM: &str = "V1_0_5";
pub const DEFAULT_BLOCK_SIZE: usize = 128;
pub const DEFAULT_ATTEMPTS: u32 = 5;
/// Upper bound on files followed in one chain, so a server-side cycle
/// cannot keep a refresh running forever.
pub const MAX_CHAIN_FILES: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchOptions {
    pub block_size: usize,
    pub attempts: u32,
    pub device_id: Option<String>,
    pub max_chain_files: usize,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            attempts: DEFAULT_ATTEMPTS,
            device_id: None,
            max_chain_files: MAX_CHAIN_FILES,
        }
    }
}

/// Per-merge counters, reported in logs and telemetry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MergeStats {
    pub files: usize,
    pub written: usize,
    /// Records ignored because an earlier file already set the slot.
    pub shadowed: usize,
    pub erroneous: usize,
    pub out_of_range: usize,
}

/// `<file_url>_add/<first>.add`
pub fn first_addendum_url(file_url: &str, first_addendum: &str) -> String {
    format!("{file_url}{ADDENDUM_FOLDER_SUFFIX}/{first_addendum}{ADDENDUM_EXTENSION}")
}

/// Split a leading `{<next-file>}` block off the first block of a file.
///
/// Returns the pointer, if any, and the offset where CSV data starts.
/// Whitespace after the closing brace is skipped. The whole pointer must fit
/// in the first block, so `block_size` bounds the pointer length.
pub fn parse_chain_pointer(block: &[u8]) -> Result<(Option<String>, usize)> {
    if block.first() != Some(&b'{') {
        return Ok((None, 0));
    }
    let close = block
        .iter()
        .position(|b| *b == b'}')
        .ok_or_else(|| {
            Error::Chain(format!(
                "chain pointer not terminated within the first block ({} bytes); \
                 raise block_size or check the server file",
                block.len()
            ))
        })?;
    let pointer = std::str::from_utf8(&block[1..close])
        .map_err(|_| Error::Chain("chain pointer is not utf-8".into()))?;
    if pointer.is_empty() {
        return Err(Error::Chain("empty chain pointer".into()));
    }

    let mut data_start = close + 1;
    while block
        .get(data_start)
        .is_some_and(|b| b.is_ascii_whitespace())
    {
        data_start += 1;
    }
    Ok((Some(pointer.to_string()), data_start))
}

/// Walk the addendum chain that starts next to `file_url` and merge every
/// file into `into`, earliest file first. Any failure aborts the merge and
/// the caller must discard `into`.
pub fn fetch_and_merge<C: HttpClient + ?Sized>(
    client: &mut C,
    into: &mut LedTable,
    file_url: &str,
    first_addendum: &str,
    opts: &FetchOptions,
    logger: &Logger,
) -> Result<MergeStats> {
    let mut stats = MergeStats::default();
    let mut next = Some(first_addendum_url(file_url, first_addendum));

    while let Some(url) = next.take() {
        if stats.files >= opts.max_chain_files {
            return Err(Error::Chain(format!(
                "chain longer than {} files at {url}",
                opts.max_chain_files
            )));
        }
        stats.files += 1;
        logger.debug(format!("fetching chain file {} ({url})", stats.files));
        next = merge_file(client, into, &url, opts, logger, &mut stats)?;
    }

    logger.debug(format!(
        "merged {} file(s) from {file_url}: {} written, {} shadowed, {} erroneous, {} out of range",
        stats.files, stats.written, stats.shadowed, stats.erroneous, stats.out_of_range
    ));
    Ok(stats)
}

fn merge_file<C: HttpClient + ?Sized>(
    client: &mut C,
    into: &mut LedTable,
    url: &str,
    opts: &FetchOptions,
    logger: &Logger,
    stats: &mut MergeStats,
) -> Result<Option<String>> {
    let request = request_url(url, opts.device_id.as_deref());
    open_server_file(client, &request, opts.attempts, logger)?;
    let result = merge_open_file(client, into, opts.block_size, stats);
    client.close();
    result
}

fn merge_open_file<C: HttpClient + ?Sized>(
    client: &mut C,
    into: &mut LedTable,
    block_size: usize,
    stats: &mut MergeStats,
) -> Result<Option<String>> {
    let mut reader = ResponseBlockReader::new(block_size);
    let view_len = 2 * reader.block_size();
    let mut ring = RingBuffer::with_capacity(view_len)?;
    let mut parser = CsvEntryParser::new(view_len);

    let block = reader.next_block(client)?;
    let mut is_final = block.is_final;
    let (pointer, data_start) = parse_chain_pointer(block.bytes)?;
    match &block.bytes[data_start..] {
        [] => ring.store(b"\n")?,
        rest => ring.store(rest)?,
    }
    ring.advance_mark(0, MarkOrigin::OldestByte)?;

    loop {
        match parser.next_entry(&mut ring) {
            Ok(entry) => apply_entry(into, entry, stats),
            Err(CsvError::NotFound) if is_final => break,
            Err(CsvError::NotFound) => {
                let block = reader.next_block(client)?;
                is_final = block.is_final;
                ring.store(block.bytes)?;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(pointer)
}

fn apply_entry(into: &mut LedTable, entry: CsvEntry, stats: &mut MergeStats) {
    match entry {
        CsvEntry::Erroneous { .. } => stats.erroneous += 1,
        CsvEntry::Record(data) => match into.merge_entry(data) {
            MergeOutcome::Written => stats.written += 1,
            MergeOutcome::AlreadySet => stats.shadowed += 1,
            MergeOutcome::OutOfRange => stats.out_of_range += 1,
        },
    }
}
