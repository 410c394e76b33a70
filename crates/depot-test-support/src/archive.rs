//! Zip payload builders for archive tests.

use std::fs::File;
use std::io::{Cursor, Read, Seek, Write};
use std::path::Path;

use anyhow::Result;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// Build an in-memory zip archive. Entries whose name ends in `/` become directories.
///
/// # Errors
///
/// Returns an error when the archive cannot be encoded.
pub fn zip_bytes(entries: &[(&str, &[u8])]) -> Result<Vec<u8>> {
    let mut cursor = Cursor::new(Vec::new());
    write_entries(&mut cursor, entries)?;
    Ok(cursor.into_inner())
}

/// Write a zip archive to disk.
///
/// # Errors
///
/// Returns an error when the file cannot be created or the archive cannot be encoded.
pub fn write_zip_archive(path: &Path, entries: &[(&str, &[u8])]) -> Result<()> {
    let mut file = File::create(path)?;
    write_entries(&mut file, entries)
}

/// Decode an archive into `(name, bytes)` pairs, directories included with empty content.
///
/// # Errors
///
/// Returns an error when the bytes are not a readable zip archive.
pub fn zip_entries(bytes: &[u8]) -> Result<Vec<(String, Vec<u8>)>> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))?;
    let mut entries = Vec::with_capacity(archive.len());
    for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;
        let mut content = Vec::new();
        entry.read_to_end(&mut content)?;
        entries.push((entry.name().to_string(), content));
    }
    entries.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(entries)
}

fn write_entries<W: Write + Seek>(writer: W, entries: &[(&str, &[u8])]) -> Result<()> {
    let mut zip = ZipWriter::new(writer);
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);
    for (name, data) in entries {
        if name.ends_with('/') {
            zip.add_directory(*name, options)?;
        } else {
            zip.start_file(*name, options)?;
            zip.write_all(data)?;
        }
    }
    zip.finish()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn built_archive_lists_its_entries() -> Result<()> {
        let bytes = zip_bytes(&[("docs/", b""), ("docs/a.txt", b"alpha"), ("b.txt", b"beta")])?;
        let entries = zip_entries(&bytes)?;
        let names: Vec<_> = entries.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(names, ["b.txt", "docs/", "docs/a.txt"]);
        assert_eq!(entries[2].1, b"alpha");
        Ok(())
    }
}
