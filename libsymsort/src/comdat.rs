//! Reads COMDAT sections out of the text produced by `dumpbin /headers` on a set of object files.
//! Each section header that names a COMDAT symbol becomes one record. Object files don't have
//! addresses, so every record starts at 0.

use crate::error::Result;
use crate::progress::PercentTracker;
use crate::progress::ProgressSink;
use crate::symbol::Symbol;
use regex::Regex;

const SECTION_HEADER_PREFIX: &str = "SECTION HEADER";
const DUMP_OF_FILE_PREFIX: &str = "Dump of file ";

struct RecordPatterns {
    name: Regex,
    size: Regex,
    comdat: Regex,
}

impl RecordPatterns {
    fn new() -> Result<Self> {
        Ok(Self {
            name: Regex::new(r"\n[ \t]*([^ \t]+)[ \t]+name")?,
            size: Regex::new(r"\n[ \t]*([A-Za-z0-9]+)[ \t]+size of raw data")?,
            comdat: Regex::new(r#"\n[ \t]*COMDAT; sym= "([^\n"]+)"#)?,
        })
    }

    /// `record` is the body of a section header with each line preceded by a newline.
    fn parse_record(&self, record: &str, source_filename: &str) -> Option<Symbol> {
        let name = self.comdat.captures(record)?.get(1)?.as_str();
        let section = self
            .name
            .captures(record)
            .and_then(|captures| captures.get(1))
            .map_or("", |m| m.as_str());
        let size = self.size.captures(record)?.get(1)?.as_str();
        let size = i64::from_str_radix(size, 16).ok()?;

        Some(
            Symbol::new(name, 0, size)
                .with_section(section)
                .with_source(source_filename),
        )
    }
}

#[tracing::instrument(skip_all, name = "Parse COMDAT dump")]
pub fn parse(text: &str, progress: &mut dyn ProgressSink) -> Result<Vec<Symbol>> {
    let patterns = RecordPatterns::new()?;
    let mut tracker = PercentTracker::new(progress);

    let mut symbols = Vec::new();
    let mut source_filename = "";
    let mut lines = text.lines();

    while let Some(line) = lines.next() {
        tracker.update(offset_in(text, line), text.len());
        if line.is_empty() {
            continue;
        }

        if line.starts_with(SECTION_HEADER_PREFIX) {
            let mut record = String::new();
            for line in lines.by_ref() {
                if line.is_empty() {
                    break;
                }
                record.push('\n');
                record.push_str(line);
            }
            match patterns.parse_record(&record, source_filename) {
                Some(symbol) => symbols.push(symbol),
                None => tracing::trace!(header = line, "Section header has no COMDAT symbol"),
            }
        } else if let Some(path) = line.strip_prefix(DUMP_OF_FILE_PREFIX) {
            source_filename = path;
        } else {
            // Some other block that we're not interested in.
            for line in lines.by_ref() {
                if line.is_empty() {
                    break;
                }
            }
        }
    }

    tracker.finish();
    Ok(symbols)
}

/// Byte offset of `line` within `text`, which it must have been split from.
fn offset_in(text: &str, line: &str) -> usize {
    line.as_ptr() as usize - text.as_ptr() as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoProgress;

    const DUMP: &str = "\
Microsoft (R) COFF/PE Dumper Version 14.29.30148.0

Dump of file obj\\widget.obj

File Type: COFF OBJECT

FILE HEADER VALUES
            8664 machine (x64)
              2F number of sections

SECTION HEADER #1
.drectve name
       0 physical address
      2F size of raw data
  100A00 flags
         Info
         Remove
         1 byte align

SECTION HEADER #2
   .text$mn name
       0 physical address
      1C size of raw data
60501020 flags
         Code
         COMDAT; sym= \"public: int __cdecl Widget::width(void)const \" (?width@Widget@@QEBAHXZ)
         16 byte align

Dump of file obj\\main.obj

SECTION HEADER #4
  .rdata name
     1A0 size of raw data
         COMDAT; sym= \"??_C@_05@hello\"

SECTION HEADER #5
  .rdata name
     ZZZZZZZZZZZZZZZZZ size of raw data
         COMDAT; sym= \"broken\"
";

    #[test]
    fn reads_comdat_sections() {
        let symbols = parse(DUMP, &mut NoProgress).unwrap();
        assert_eq!(symbols.len(), 2);

        let width = &symbols[0];
        assert_eq!(width.name, "public: int __cdecl Widget::width(void)const ");
        assert_eq!(width.short_name, width.name);
        assert_eq!(width.section, ".text$mn");
        assert_eq!(width.size, 0x1c);
        assert_eq!(width.rva_start, 0);
        assert_eq!(width.source_filename, "obj\\widget.obj");

        let hello = &symbols[1];
        assert_eq!(hello.name, "??_C@_05@hello");
        assert_eq!(hello.section, ".rdata");
        assert_eq!(hello.size, 0x1a0);
        assert_eq!(hello.source_filename, "obj\\main.obj");
    }

    #[test]
    fn empty_input() {
        assert!(parse("", &mut NoProgress).unwrap().is_empty());
    }
}
