/// Binary inspector tests over synthetic ELF images.
///
/// Each fixture is assembled byte by byte: a header, the section contents,
/// and a section header table, written to a temporary file and fed to the
/// inspector. This pins the byte-exact contract of the reader: symbol sizes,
/// `@@` aliasing, the relocation sweep of shared objects, and the `.rodata`
/// vtable walk of executables.

use std::io::Write;

use tempfile::TempDir;

use thermograph::elf::{ET_DYN, ET_EXEC, STB_WEAK, STT_FUNC};
use thermograph::inspect::BinaryInspector;

// ─── Fixture builder ──────────────────────────────────────────────────────────

#[derive(Clone, Copy, PartialEq)]
enum Class {
    Elf32,
    Elf64,
}

struct SectionSpec {
    name: &'static str,
    sh_type: u32,
    addr: u64,
    link: u32,
    entsize: u64,
    data: Vec<u8>,
}

/// Assemble a little-endian ELF image: header, section contents in order,
/// then the section header table. Section 0 is the customary null section;
/// the name table is appended last.
fn build_elf(class: Class, e_type: u16, entry: u64, mut sections: Vec<SectionSpec>) -> Vec<u8> {
    // Section name string table, referenced from the header.
    let mut shstrtab = vec![0u8];
    let mut name_offsets = vec![0u32];
    for section in &sections {
        name_offsets.push(shstrtab.len() as u32);
        shstrtab.extend_from_slice(section.name.as_bytes());
        shstrtab.push(0);
    }
    let shstrtab_name_offset = shstrtab.len() as u32;
    shstrtab.extend_from_slice(b".shstrtab");
    shstrtab.push(0);
    sections.push(SectionSpec {
        name: ".shstrtab",
        sh_type: 3,
        addr: 0,
        link: 0,
        entsize: 0,
        data: shstrtab,
    });
    name_offsets.push(shstrtab_name_offset);

    let (header_len, shentsize) = match class {
        Class::Elf32 => (52usize, 40usize),
        Class::Elf64 => (64, 64),
    };

    // Null section + declared sections.
    let section_count = sections.len() + 1;

    let mut offsets = Vec::with_capacity(sections.len());
    let mut cursor = header_len;
    for section in &sections {
        offsets.push(cursor as u64);
        cursor += section.data.len();
    }
    let shoff = cursor;

    let mut image = Vec::new();

    // ELF header.
    image.extend_from_slice(&[0x7f, b'E', b'L', b'F']);
    image.push(if class == Class::Elf32 { 1 } else { 2 });
    image.push(1); // little endian
    image.push(1); // EV_CURRENT
    image.resize(16, 0);
    image.extend_from_slice(&e_type.to_le_bytes());
    image.extend_from_slice(&62u16.to_le_bytes()); // machine, unused
    image.extend_from_slice(&1u32.to_le_bytes()); // version
    match class {
        Class::Elf32 => {
            image.extend_from_slice(&(entry as u32).to_le_bytes());
            image.extend_from_slice(&0u32.to_le_bytes()); // e_phoff
            image.extend_from_slice(&(shoff as u32).to_le_bytes());
            image.extend_from_slice(&0u32.to_le_bytes()); // e_flags
            image.extend_from_slice(&52u16.to_le_bytes()); // e_ehsize
            image.extend_from_slice(&0u16.to_le_bytes()); // e_phentsize
            image.extend_from_slice(&0u16.to_le_bytes()); // e_phnum
            image.extend_from_slice(&(shentsize as u16).to_le_bytes());
            image.extend_from_slice(&(section_count as u16).to_le_bytes());
            image.extend_from_slice(&(section_count as u16 - 1).to_le_bytes()); // shstrndx
        }
        Class::Elf64 => {
            image.extend_from_slice(&entry.to_le_bytes());
            image.extend_from_slice(&0u64.to_le_bytes()); // e_phoff
            image.extend_from_slice(&(shoff as u64).to_le_bytes());
            image.extend_from_slice(&0u32.to_le_bytes()); // e_flags
            image.extend_from_slice(&64u16.to_le_bytes()); // e_ehsize
            image.extend_from_slice(&0u16.to_le_bytes()); // e_phentsize
            image.extend_from_slice(&0u16.to_le_bytes()); // e_phnum
            image.extend_from_slice(&(shentsize as u16).to_le_bytes());
            image.extend_from_slice(&(section_count as u16).to_le_bytes());
            image.extend_from_slice(&(section_count as u16 - 1).to_le_bytes()); // shstrndx
        }
    }
    assert_eq!(image.len(), header_len);

    // Section contents.
    for section in &sections {
        image.extend_from_slice(&section.data);
    }

    // Section header table: null section first. `link` values are final
    // table indices (0 = null section, 1 = first declared section).
    image.extend_from_slice(&vec![0u8; shentsize]);
    for (index, section) in sections.iter().enumerate() {
        let link = section.link;
        match class {
            Class::Elf32 => {
                image.extend_from_slice(&name_offsets[index + 1].to_le_bytes());
                image.extend_from_slice(&section.sh_type.to_le_bytes());
                image.extend_from_slice(&0u32.to_le_bytes()); // flags
                image.extend_from_slice(&(section.addr as u32).to_le_bytes());
                image.extend_from_slice(&(offsets[index] as u32).to_le_bytes());
                image.extend_from_slice(&(section.data.len() as u32).to_le_bytes());
                image.extend_from_slice(&link.to_le_bytes());
                image.extend_from_slice(&0u32.to_le_bytes()); // info
                image.extend_from_slice(&1u32.to_le_bytes()); // addralign
                image.extend_from_slice(&(section.entsize as u32).to_le_bytes());
            }
            Class::Elf64 => {
                image.extend_from_slice(&name_offsets[index + 1].to_le_bytes());
                image.extend_from_slice(&section.sh_type.to_le_bytes());
                image.extend_from_slice(&0u64.to_le_bytes()); // flags
                image.extend_from_slice(&section.addr.to_le_bytes());
                image.extend_from_slice(&offsets[index].to_le_bytes());
                image.extend_from_slice(&(section.data.len() as u64).to_le_bytes());
                image.extend_from_slice(&link.to_le_bytes());
                image.extend_from_slice(&0u32.to_le_bytes()); // info
                image.extend_from_slice(&1u64.to_le_bytes()); // addralign
                image.extend_from_slice(&section.entsize.to_le_bytes());
            }
        }
    }

    image
}

/// String table plus name offsets for the given symbol names.
fn build_strtab(names: &[&str]) -> (Vec<u8>, Vec<u32>) {
    let mut table = vec![0u8];
    let mut offsets = Vec::new();
    for name in names {
        offsets.push(table.len() as u32);
        table.extend_from_slice(name.as_bytes());
        table.push(0);
    }
    (table, offsets)
}

struct SymbolSpec {
    name_offset: u32,
    value: u64,
    size: u64,
    info: u8,
}

fn encode_symbols(class: Class, symbols: &[SymbolSpec]) -> Vec<u8> {
    let mut data = Vec::new();
    for symbol in symbols {
        match class {
            Class::Elf32 => {
                data.extend_from_slice(&symbol.name_offset.to_le_bytes());
                data.extend_from_slice(&(symbol.value as u32).to_le_bytes());
                data.extend_from_slice(&(symbol.size as u32).to_le_bytes());
                data.push(symbol.info);
                data.push(0); // st_other
                data.extend_from_slice(&1u16.to_le_bytes()); // st_shndx
            }
            Class::Elf64 => {
                data.extend_from_slice(&symbol.name_offset.to_le_bytes());
                data.push(symbol.info);
                data.push(0); // st_other
                data.extend_from_slice(&1u16.to_le_bytes()); // st_shndx
                data.extend_from_slice(&symbol.value.to_le_bytes());
                data.extend_from_slice(&symbol.size.to_le_bytes());
            }
        }
    }
    data
}

fn func_info() -> u8 {
    STT_FUNC
}

fn weak_object_info() -> u8 {
    (STB_WEAK << 4) | 1
}

fn write_fixture(dir: &TempDir, name: &str, image: &[u8]) -> String {
    let path = dir.path().join(name);
    let mut file = std::fs::File::create(&path).expect("create fixture");
    file.write_all(image).expect("write fixture");
    path.to_string_lossy().into_owned()
}

// ─── Shared objects ───────────────────────────────────────────────────────────

/// ELF64 shared object: `.dynsym` sizes plus a vtable whose slots are
/// relocations against the virtual function's symbol.
#[test]
fn shared_object_sizes_and_virtual_functions() {
    let names = [
        "frobnicate",
        "_ZTV4Base",
        "_ZN4Base3actEv",
        "versioned@@LIB_2.0",
    ];
    let (strtab, offsets) = build_strtab(&names);

    let symbols = vec![
        // Index 0 is the reserved undefined symbol.
        SymbolSpec {
            name_offset: 0,
            value: 0,
            size: 0,
            info: 0,
        },
        SymbolSpec {
            name_offset: offsets[0],
            value: 0x1000,
            size: 42,
            info: func_info(),
        },
        SymbolSpec {
            name_offset: offsets[1],
            value: 0x2000,
            size: 24,
            info: weak_object_info(),
        },
        SymbolSpec {
            name_offset: offsets[2],
            value: 0x1100,
            size: 10,
            info: func_info(),
        },
        SymbolSpec {
            name_offset: offsets[3],
            value: 0x1200,
            size: 7,
            info: func_info(),
        },
    ];

    // Unsorted on purpose: one slot inside the vtable range referencing the
    // virtual function, one relocation far outside it.
    let mut rela = Vec::new();
    for (address, symbol) in [(0x3000u64, 1u64), (0x2008, 3)] {
        rela.extend_from_slice(&address.to_le_bytes());
        rela.extend_from_slice(&((symbol << 32) | 1).to_le_bytes());
        rela.extend_from_slice(&0u64.to_le_bytes());
    }

    let image = build_elf(
        Class::Elf64,
        ET_DYN,
        0,
        vec![
            SectionSpec {
                name: ".dynstr",
                sh_type: 3,
                addr: 0,
                link: 0,
                entsize: 0,
                data: strtab,
            },
            SectionSpec {
                name: ".dynsym",
                sh_type: 11,
                addr: 0,
                link: 1, // .dynstr
                entsize: 24,
                data: encode_symbols(Class::Elf64, &symbols),
            },
            SectionSpec {
                name: ".rela.dyn",
                sh_type: 4,
                addr: 0,
                link: 2,
                entsize: 24,
                data: rela,
            },
        ],
    );

    let dir = TempDir::new().expect("tempdir");
    let path = write_fixture(&dir, "libbase.so", &image);

    let mut inspector = BinaryInspector::new();
    assert_eq!(inspector.size_of(&path, "frobnicate"), 42);
    assert_eq!(inspector.size_of(&path, "_ZN4Base3actEv"), 10);

    // Versioned symbols are recorded under both spellings.
    assert_eq!(inspector.size_of(&path, "versioned@@LIB_2.0"), 7);
    assert_eq!(inspector.size_of(&path, "versioned"), 7);

    // Only the relocation inside the vtable range marks a virtual function.
    assert!(inspector.is_virtual(&path, "_ZN4Base3actEv"));
    assert!(!inspector.is_virtual(&path, "frobnicate"));
    assert!(!inspector.is_virtual(&path, "versioned@@LIB_2.0"));

    assert_eq!(inspector.library_count(), 1);
}

/// The same shared object in demangled mode stores readable names.
#[test]
fn demangled_mode_stores_readable_names() {
    let names = ["_ZN4Base3actEv", "_ZTV4Base"];
    let (strtab, offsets) = build_strtab(&names);

    let symbols = vec![
        SymbolSpec {
            name_offset: 0,
            value: 0,
            size: 0,
            info: 0,
        },
        SymbolSpec {
            name_offset: offsets[0],
            value: 0x1100,
            size: 10,
            info: func_info(),
        },
        SymbolSpec {
            name_offset: offsets[1],
            value: 0x2000,
            size: 16,
            info: weak_object_info(),
        },
    ];

    let mut rela = Vec::new();
    rela.extend_from_slice(&0x2008u64.to_le_bytes());
    rela.extend_from_slice(&((1u64 << 32) | 1).to_le_bytes());
    rela.extend_from_slice(&0u64.to_le_bytes());

    let image = build_elf(
        Class::Elf64,
        ET_DYN,
        0,
        vec![
            SectionSpec {
                name: ".dynstr",
                sh_type: 3,
                addr: 0,
                link: 0,
                entsize: 0,
                data: strtab,
            },
            SectionSpec {
                name: ".dynsym",
                sh_type: 11,
                addr: 0,
                link: 1,
                entsize: 24,
                data: encode_symbols(Class::Elf64, &symbols),
            },
            SectionSpec {
                name: ".rela.dyn",
                sh_type: 4,
                addr: 0,
                link: 2,
                entsize: 24,
                data: rela,
            },
        ],
    );

    let dir = TempDir::new().expect("tempdir");
    let path = write_fixture(&dir, "libbase.so", &image);

    let mut inspector = BinaryInspector::new();
    inspector.set_demangled(true);

    assert_eq!(inspector.size_of(&path, "Base::act()"), 10);
    assert!(inspector.is_virtual(&path, "Base::act()"));
    assert_eq!(inspector.size_of(&path, "_ZN4Base3actEv"), 0);
}

// ─── Executables ──────────────────────────────────────────────────────────────

/// ELF32 executable: the vtable lives in `.rodata`, and its slots hold the
/// virtual functions' addresses directly.
#[test]
fn executable_rodata_walk_finds_virtual_functions() {
    let names = ["plain", "_ZN5Shape4areaEv", "_ZN6Circle4areaEv", "_ZTV5Shape"];
    let (strtab, offsets) = build_strtab(&names);

    let symbols = vec![
        SymbolSpec {
            name_offset: 0,
            value: 0,
            size: 0,
            info: 0,
        },
        SymbolSpec {
            name_offset: offsets[0],
            value: 0x0804_8190,
            size: 5,
            info: func_info(),
        },
        SymbolSpec {
            name_offset: offsets[1],
            value: 0x0804_81a0,
            size: 6,
            info: func_info(),
        },
        SymbolSpec {
            name_offset: offsets[2],
            value: 0x0804_81b0,
            size: 6,
            info: func_info(),
        },
        // The vtable symbol points into .rodata below.
        SymbolSpec {
            name_offset: offsets[3],
            value: 0x0804_8210,
            size: 16,
            info: weak_object_info(),
        },
    ];

    // .text is empty and sits immediately before .rodata, so the program
    // base works out to exactly the entry point and .rodata is mapped at
    // its declared address.
    let entry = 0x0804_8200u64;

    // 0x30 bytes of rodata mapped at 0x08048200. The vtable occupies
    // [0x08048210, 0x08048220): offset-to-top, rtti, then two slots with
    // the virtual functions' addresses.
    let mut rodata = vec![0u8; 0x30];
    rodata[0x18..0x1c].copy_from_slice(&0x0804_81a0u32.to_le_bytes());
    rodata[0x1c..0x20].copy_from_slice(&0x0804_81b0u32.to_le_bytes());

    let image = build_elf(
        Class::Elf32,
        ET_EXEC,
        entry,
        vec![
            SectionSpec {
                name: ".strtab",
                sh_type: 3,
                addr: 0,
                link: 0,
                entsize: 0,
                data: strtab,
            },
            SectionSpec {
                name: ".symtab",
                sh_type: 2,
                addr: 0,
                link: 1, // .strtab
                entsize: 16,
                data: encode_symbols(Class::Elf32, &symbols),
            },
            SectionSpec {
                name: ".text",
                sh_type: 1,
                addr: entry,
                link: 0,
                entsize: 0,
                data: Vec::new(),
            },
            SectionSpec {
                name: ".rodata",
                sh_type: 1,
                addr: 0x0804_8200,
                link: 0,
                entsize: 0,
                data: rodata,
            },
        ],
    );

    let dir = TempDir::new().expect("tempdir");
    let path = write_fixture(&dir, "tool", &image);

    let mut inspector = BinaryInspector::new();
    assert_eq!(inspector.size_of(&path, "plain"), 5);
    assert_eq!(inspector.size_of(&path, "_ZN5Shape4areaEv"), 6);

    assert!(inspector.is_virtual(&path, "_ZN5Shape4areaEv"));
    assert!(inspector.is_virtual(&path, "_ZN6Circle4areaEv"));
    assert!(!inspector.is_virtual(&path, "plain"));
}

// ─── Degraded inputs ──────────────────────────────────────────────────────────

#[test]
fn missing_files_yield_empty_results() {
    let mut inspector = BinaryInspector::new();
    assert_eq!(inspector.size_of("/definitely/not/here.so", "f"), 0);
    assert!(!inspector.is_virtual("/definitely/not/here.so", "f"));
}

#[test]
fn garbage_files_are_rejected_and_remembered() {
    let dir = TempDir::new().expect("tempdir");
    let path = write_fixture(&dir, "garbage.so", b"this is not an object file");

    let mut inspector = BinaryInspector::new();
    assert!(inspector.parse_file(&path).is_err());
    assert_eq!(inspector.size_of(&path, "f"), 0);
    // Seen once, never retried.
    assert_eq!(inspector.library_count(), 1);
    assert!(inspector.parse_file(&path).is_ok());
}

#[test]
fn truncated_headers_fail_without_panicking() {
    let dir = TempDir::new().expect("tempdir");
    // Valid magic and class, then nothing.
    let path = write_fixture(&dir, "stub.so", &[0x7f, b'E', b'L', b'F', 2, 1, 1, 0]);

    let mut inspector = BinaryInspector::new();
    assert!(inspector.parse_file(&path).is_err());
    assert_eq!(inspector.size_of(&path, "f"), 0);
}
