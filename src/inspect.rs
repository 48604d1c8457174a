/// Binary symbol inspector.
///
/// Recovers per-function sizes and the set of virtual functions from the
/// application's binaries. Virtual functions are found by intersecting the
/// vtable symbol ranges (`_ZTV…`, weak binding) with the dynamic relocations
/// of a shared object, or with the function pointers laid out in the
/// `.rodata` of an executable.
///
/// Results are cached per inspector and keyed `"<file>##<symbol>"`. Every
/// file is parsed at most once; a file that cannot be read or parsed is
/// logged and simply contributes nothing, so lookups degrade to size 0 and
/// non-virtual.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::time::Instant;

use tracing::{debug, warn};

use crate::elf::{
    read_u32_le, read_u64_le, ElfClass, ElfImage, Section, ET_DYN, ET_EXEC, STB_WEAK, STT_FUNC,
};
use crate::errors::ElfError;

/// `.rodata` is walked line by line, the way object dumps print it.
const BYTES_PER_LINE: i64 = 16;

/// Demangle an Itanium-ABI symbol, falling back to the input when the name
/// does not demangle.
pub fn demangle(mangled: &str) -> String {
    cpp_demangle::Symbol::new(mangled.as_bytes())
        .ok()
        .and_then(|symbol| symbol.demangle(&cpp_demangle::DemangleOptions::default()).ok())
        .unwrap_or_else(|| mangled.to_string())
}

// ---------------------------------------------------------------------------
// Inspector
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
struct VirtualTable {
    address: u64,
    size: u64,
}

#[derive(Debug, Default)]
pub struct BinaryInspector {
    demangled: bool,
    files: HashSet<String>,
    sizes: HashMap<String, u64>,
    virtuals: HashSet<String>,
}

impl BinaryInspector {
    pub fn new() -> Self {
        BinaryInspector::default()
    }

    /// Store demangled symbol names instead of mangled ones. Must match the
    /// naming convention of the call-graph profile.
    pub fn set_demangled(&mut self, demangled: bool) {
        self.demangled = demangled;
    }

    pub fn is_demangled(&self) -> bool {
        self.demangled
    }

    /// Size in bytes of `function` inside `file`, or 0 when unknown.
    pub fn size_of(&mut self, file: &str, function: &str) -> u64 {
        self.ensure_parsed(file);
        self.sizes
            .get(&symbol_key(file, function))
            .copied()
            .unwrap_or(0)
    }

    /// Whether `function` occupies a vtable slot of `file`.
    pub fn is_virtual(&mut self, file: &str, function: &str) -> bool {
        self.ensure_parsed(file);
        self.virtuals.contains(&symbol_key(file, function))
    }

    /// Every virtual function recorded so far, keyed `"<file>##<symbol>"`.
    pub fn virtual_functions(&self) -> &HashSet<String> {
        &self.virtuals
    }

    /// Number of distinct binaries that have been consulted.
    pub fn library_count(&self) -> usize {
        self.files.len()
    }

    #[cfg(test)]
    pub(crate) fn insert_virtual(&mut self, file: &str, symbol: &str) {
        self.virtuals.insert(symbol_key(file, symbol));
    }

    fn ensure_parsed(&mut self, file: &str) {
        // The call graph occasionally carries entries with no module.
        if file.trim().is_empty() {
            return;
        }
        if self.files.contains(file) {
            return;
        }
        if let Err(error) = self.parse_file(file) {
            warn!(file, %error, "skipping binary");
        }
    }

    /// Parse one binary into the caches. The file is marked as seen whether
    /// or not parsing succeeds, so it is never retried.
    pub fn parse_file(&mut self, file: &str) -> Result<(), ElfError> {
        if !self.files.insert(file.to_string()) {
            return Ok(());
        }

        let start = Instant::now();
        let bytes = fs::read(file)?;
        let image = ElfImage::parse(&bytes)?;

        match image.e_type {
            ET_DYN => self.parse_library(file, &image)?,
            ET_EXEC => self.parse_executable(file, &image)?,
            other => return Err(ElfError::UnsupportedType(other)),
        }

        debug!(
            file,
            elapsed_ms = start.elapsed().as_millis() as u64,
            sizes = self.sizes.len(),
            virtuals = self.virtuals.len(),
            "binary parsed"
        );
        Ok(())
    }

    // ── Symbol extraction ───────────────────────────────────────────────

    /// Walk one symbol table: record function sizes, collect vtable symbols,
    /// and index functions by address for the executable walk.
    fn extract_symbols(
        &mut self,
        file: &str,
        image: &ElfImage<'_>,
        table: &Section,
    ) -> Result<(Vec<String>, Vec<VirtualTable>, HashMap<u64, usize>), ElfError> {
        let entries = image.symbols(table)?;

        let mut symbols = Vec::with_capacity(entries.len());
        let mut vtables = Vec::new();
        let mut functions_by_address = HashMap::new();

        for (index, symbol) in entries.iter().enumerate() {
            let name = image.symbol_name(table, symbol).unwrap_or_default();
            let store_name = if self.demangled {
                demangle(&name)
            } else {
                name.clone()
            };

            if symbol.sym_type() == STT_FUNC {
                functions_by_address.insert(symbol.value, index);

                // A zero size carries no information.
                if symbol.size > 0 {
                    let key = symbol_key(file, &store_name);
                    if let Some(&known) = self.sizes.get(&key) {
                        if known != symbol.size {
                            warn!(
                                symbol = %key,
                                known,
                                new = symbol.size,
                                "function size recorded twice with different values"
                            );
                        }
                    }
                    self.sizes.insert(key, symbol.size);

                    // Versioned symbols are stored under both spellings.
                    if let Some(position) = store_name.find("@@") {
                        self.sizes
                            .insert(symbol_key(file, &store_name[..position]), symbol.size);
                    }
                }
            } else if symbol.binding() == STB_WEAK && name.contains("_ZTV") {
                vtables.push(VirtualTable {
                    address: symbol.value,
                    size: symbol.size,
                });
            }

            symbols.push(store_name);
        }

        Ok((symbols, vtables, functions_by_address))
    }

    // ── Shared objects ──────────────────────────────────────────────────

    /// In a shared object the vtable slots are filled by the dynamic linker,
    /// so every slot shows up as a relocation inside the vtable's range.
    fn parse_library(&mut self, file: &str, image: &ElfImage<'_>) -> Result<(), ElfError> {
        debug!(file, class = ?image.class, "parsing shared object");

        let table = image
            .section(".dynsym")
            .ok_or(ElfError::MissingSection(".dynsym"))?;
        let (symbols, mut vtables, _) = self.extract_symbols(file, image, table)?;

        debug!(file, vtables = vtables.len(), "vtable symbols found");
        if vtables.is_empty() {
            return Ok(());
        }

        let relocation_section = match image.class {
            ElfClass::Elf32 => ".rel.dyn",
            ElfClass::Elf64 => ".rela.dyn",
        };
        let relocation_table = image
            .section(relocation_section)
            .ok_or(ElfError::MissingSection(".rel.dyn/.rela.dyn"))?;

        // Symbol index 0 is the reserved undefined symbol.
        let mut relocations: Vec<_> = image
            .relocations(relocation_table)?
            .into_iter()
            .filter(|r| r.symbol != 0)
            .collect();

        vtables.sort_by_key(|v| v.address);
        relocations.sort_by_key(|r| r.address);

        let mut current = 0;
        for relocation in &relocations {
            while current < vtables.len()
                && relocation.address >= vtables[current].address + vtables[current].size
            {
                current += 1;
            }
            if current == vtables.len() {
                break;
            }

            let vtable = vtables[current];
            if relocation.address >= vtable.address
                && relocation.address < vtable.address + vtable.size
            {
                if let Some(name) = symbols.get(relocation.symbol as usize) {
                    self.virtuals.insert(symbol_key(file, name));
                }
            }
        }

        Ok(())
    }

    // ── Executables ─────────────────────────────────────────────────────

    /// In an executable the vtables are materialized in `.rodata`, so the
    /// slots are read directly and matched against function addresses.
    fn parse_executable(&mut self, file: &str, image: &ElfImage<'_>) -> Result<(), ElfError> {
        debug!(file, class = ?image.class, "parsing executable");

        let table = image
            .section(".symtab")
            .ok_or(ElfError::MissingSection(".symtab"))?;
        let (symbols, mut vtables, functions_by_address) =
            self.extract_symbols(file, image, table)?;

        debug!(file, vtables = vtables.len(), "vtable symbols found");
        if vtables.is_empty() {
            return Ok(());
        }
        vtables.sort_by_key(|v| v.address);

        let rodata = image
            .section(".rodata")
            .ok_or(ElfError::MissingSection(".rodata"))?;
        let data = image.section_data(rodata)?;
        if data.is_empty() {
            return Ok(());
        }

        let text = image
            .section(".text")
            .ok_or(ElfError::MissingSection(".text"))?;
        // Virtual address of the first .rodata byte: program base plus the
        // section's file offset.
        let base = image
            .entry
            .wrapping_sub(text.offset)
            .wrapping_add(rodata.offset);

        // Hard layout assumption: 16-byte lines holding 32 / function_size
        // slots of function_size / 2 bytes each.
        let function_size: i64 = match image.class {
            ElfClass::Elf32 => 8,
            ElfClass::Elf64 => 16,
        };
        let slot_width = function_size / 2;
        let slots_per_line = 32 / function_size;

        let length = data.len() as i64;
        let mut current = 0usize;
        let mut offset: i64 = 0;
        let mut address = base as i64;

        while offset < length && current < vtables.len() {
            // Past the current vtable: move to the next one and step one line
            // back, since a vtable may begin in the middle of a line.
            if address as u64 > vtables[current].address + vtables[current].size {
                current += 1;
                if current == vtables.len() {
                    break;
                }
                if offset >= BYTES_PER_LINE {
                    offset -= BYTES_PER_LINE;
                    address -= BYTES_PER_LINE;
                }
            }

            let vtable = vtables[current];
            if (address as u64) >= vtable.address && (address as u64) <= vtable.address + vtable.size
            {
                let mut slot = 0;
                while slot < slots_per_line && offset < length {
                    if offset + slot_width <= length {
                        let value = match image.class {
                            ElfClass::Elf32 => read_u32_le(data, offset as usize),
                            ElfClass::Elf64 => read_u64_le(data, offset as usize),
                        };
                        if value > 0 {
                            if let Some(&index) = functions_by_address.get(&value) {
                                if let Some(name) = symbols.get(index) {
                                    self.virtuals.insert(symbol_key(file, name));
                                }
                            }
                        }
                    }
                    slot += 1;
                    offset += slot_width;
                }
            } else {
                offset += BYTES_PER_LINE;
            }

            address += BYTES_PER_LINE;
        }

        Ok(())
    }
}

fn symbol_key(file: &str, symbol: &str) -> String {
    format!("{file}##{symbol}")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_symbols_degrade_to_zero() {
        let mut inspector = BinaryInspector::new();
        assert_eq!(inspector.size_of("/no/such/file.so", "f"), 0);
        assert!(!inspector.is_virtual("/no/such/file.so", "f"));
        // The file is consulted once and remembered.
        assert_eq!(inspector.library_count(), 1);
    }

    #[test]
    fn empty_module_paths_are_ignored() {
        let mut inspector = BinaryInspector::new();
        assert_eq!(inspector.size_of("  ", "f"), 0);
        assert_eq!(inspector.library_count(), 0);
    }

    #[test]
    fn demangling_falls_back_to_the_input() {
        assert_eq!(demangle("not_mangled"), "not_mangled");
        assert_eq!(demangle("_ZN3foo3barEv"), "foo::bar()");
    }
}
