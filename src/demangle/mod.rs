//! Demangler helpers for Rust and C++ (Itanium) symbol names.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolFlavor {
    Rust,
    Itanium,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DemangleResult {
    pub original: String,
    pub demangled: String,
    pub flavor: SymbolFlavor,
}

fn looks_itanium(s: &str) -> bool {
    // Mach-O style names carry an extra leading underscore.
    s.starts_with("_Z") || s.starts_with("__Z")
}

pub fn detect_flavor(s: &str) -> SymbolFlavor {
    if rustc_demangle::try_demangle(s).is_ok() {
        return SymbolFlavor::Rust;
    }
    if looks_itanium(s) {
        return SymbolFlavor::Itanium;
    }
    SymbolFlavor::Unknown
}

/// Attempt to demangle a single symbol. Returns None when not recognized.
pub fn demangle_one(s: &str) -> Option<DemangleResult> {
    // Rust (v0 + legacy) demangler
    if let Ok(dm) = rustc_demangle::try_demangle(s) {
        // `{:#}` drops the trailing hash of legacy names.
        return Some(DemangleResult {
            original: s.to_string(),
            demangled: format!("{:#}", dm),
            flavor: SymbolFlavor::Rust,
        });
    }
    if looks_itanium(s) {
        if let Ok(sym) = cpp_demangle::Symbol::new(s) {
            return Some(DemangleResult {
                original: s.to_string(),
                demangled: sym.to_string(),
                flavor: SymbolFlavor::Itanium,
            });
        }
    }
    None
}
