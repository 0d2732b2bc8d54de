pub mod format_detector;
pub mod kicad;
pub mod library;
pub mod netlist;
pub mod schema;
pub mod sexp;

// Re-export for convenience
pub use format_detector::{detect_format, detect_netlist_format, KicadVersion, NetlistFormat};
pub use kicad::{KicadParseError, KicadParser};
pub use library::{place_pin, EmbeddedLibrary, LibraryPin, PinOffsetLookup, StaticLibrary};
pub use netlist::{AuthoritativeNet, NetNode, NetlistComponent, NetlistError, NetlistIndex};
pub use schema::*;
pub use sexp::{ParseError, SExp, SExpParser};
