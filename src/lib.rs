//! gnu2-demangler is a crate for Rust that can demangle C++ symbols which use
//! the GNU v2 mangling scheme.  These were emitted by GCC before the switch to
//! the GNU v3 (Itanium) ABI, and still show up in old binaries and link maps.
//!
//! # Example
//!
//! ```
//! use gnu2_demangler;
//! let flags = gnu2_demangler::DemangleFlags::empty();
//! let result = gnu2_demangler::demangle("BgFilter__9ivTSolverP12ivInteractor", flags).unwrap();
//! assert_eq!(result, "ivTSolver::BgFilter(ivInteractor *)");
//! ```
//!
//! # Behavior
//!
//! The output follows the historical GNU demangler where the two agree.  One
//! quirk is kept on purpose: the `O` type code parses as an r-value reference
//! and prints as `&&`, and a back-referenced parameter (`T<n>`, `N<c><n>`)
//! prints exactly like the parameter it repeats, so repeats of an `O`-typed
//! parameter also show `&&`.  This marker predates C++11 and is *not* a real
//! r-value reference; pass [`DemangleFlags::NO_RVALUE_MARKER`] to render a
//! plain `&` instead.
//!
//! Inputs that do not parse are echoed back by [`demangle_lossy`], matching
//! the behavior of `c++filt`.

#![deny(missing_debug_implementations)]
#![deny(unsafe_code)]

#[macro_use]
extern crate bitflags;

use std::error;
use std::fmt;
use std::io;
use std::io::Write;
use std::result;

/// A parse or serialization failure, carrying the input offset it happened at.
pub struct Error {
    kind: ErrorKind,
    offset: usize,
    context: String,
}

/// The closed set of ways a demangling can fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// The cursor was exhausted where more input was required.
    UnexpectedEnd,
    /// A length prefix or count was missing where one was required.
    ExpectedDigits,
    /// An unrecognized type-encoding byte.
    UnknownTypeCode(u8),
    /// A `T`/`N` code referenced a slot that has not been populated yet.
    BackRefOutOfRange(usize),
    /// A recognized gap in this dialect's coverage.
    UnsupportedFeature(&'static str),
    /// A qualified-name count disagreed with the segments present.
    MalformedName,
    /// Bytes remained after a complete top-level parse.
    TrailingGarbage(usize),
    /// An internal consistency check failed; indicates a bug, never echoed.
    InvariantViolated(&'static str),
}

impl Error {
    fn new(kind: ErrorKind, input: &str, offset: usize) -> Error {
        let context = input.as_bytes().get(offset..).unwrap_or(&[]);
        let context = if context.len() > 20 {
            format!("{}...", String::from_utf8_lossy(&context[..20]))
        } else {
            String::from_utf8_lossy(context).to_string()
        };
        Error {
            kind,
            offset,
            context,
        }
    }

    /// Returns which kind of failure this is.
    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    /// Returns the offset in the input where the error happened.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Internal-consistency failures are never swallowed by the echoing
    /// surfaces; everything else is.
    pub fn is_hard(&self) -> bool {
        match self.kind {
            ErrorKind::InvariantViolated(_) => true,
            _ => false,
        }
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(&self.kind, f)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.kind {
            ErrorKind::UnexpectedEnd => write!(f, "unexpected end of input")?,
            ErrorKind::ExpectedDigits => write!(f, "expected digits")?,
            ErrorKind::UnknownTypeCode(c) => {
                write!(f, "unknown type code `{}`", char::from(c))?
            }
            ErrorKind::BackRefOutOfRange(n) => {
                write!(f, "back-reference {} is out of range", n)?
            }
            ErrorKind::UnsupportedFeature(what) => write!(f, "unsupported: {}", what)?,
            ErrorKind::MalformedName => write!(f, "malformed qualified name")?,
            ErrorKind::TrailingGarbage(at) => {
                write!(f, "trailing characters at offset {}", at)?
            }
            ErrorKind::InvariantViolated(what) => write!(f, "invariant violated: {}", what)?,
        }
        write!(f, " (offset: {}, remaining: {:?})", self.offset, self.context)
    }
}

impl error::Error for Error {}

type Result<T> = result::Result<T, Error>;

bitflags! {
    /// Options controlling how a parsed symbol is rendered.
    pub struct DemangleFlags: u32 {
        /// Render only the (possibly templated) qualified name, without the
        /// parameter list or trailing member-function qualifiers.
        const NAME_ONLY = 0b0001;
        /// Render r-value references (and repeats of them) as `&`, suppressing
        /// the historical `&&` marker.
        const NO_RVALUE_MARKER = 0b0010;
    }
}

bitflags! {
    /// CV-qualifiers and arithmetic specifiers carried by a type.
    pub struct Qualifiers: u32 {
        const CONST    = 0b0000_0001;
        const VOLATILE = 0b0000_0010;
        const RESTRICT = 0b0000_0100;
        const SIGNED   = 0b0000_1000;
        const UNSIGNED = 0b0001_0000;
        const COMPLEX  = 0b0010_0000;
    }
}

bitflags! {
    /// Properties of a symbol that sit outside its name and type.
    pub struct SpecialFlags: u32 {
        const IS_CONSTRUCTOR         = 0b0000_0001;
        const IS_DESTRUCTOR          = 0b0000_0010;
        const IS_VIRTUAL_THUNK       = 0b0000_0100;
        const IS_STATIC_MEMBER_FN    = 0b0000_1000;
        const IS_CONST_MEMBER_FN     = 0b0001_0000;
        const IS_VOLATILE_MEMBER_FN  = 0b0010_0000;
        const IS_RESTRICT_MEMBER_FN  = 0b0100_0000;
        const IS_DLL_IMPORT          = 0b1000_0000;
    }
}

/// The fixed set of fundamental types this dialect can encode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Builtin {
    Void,
    Bool,
    Char,
    SChar,
    UChar,
    WChar,
    Short,
    UShort,
    Int,
    UInt,
    Long,
    ULong,
    LongLong,
    ULongLong,
    Float,
    Double,
    LongDouble,
    /// The varargs sentinel; reserved for the (unsupported) ellipsis code.
    Varargs,
}

impl Builtin {
    fn as_str(self) -> &'static str {
        match self {
            Builtin::Void => "void",
            Builtin::Bool => "bool",
            Builtin::Char => "char",
            Builtin::SChar => "signed char",
            Builtin::UChar => "unsigned char",
            Builtin::WChar => "wchar_t",
            Builtin::Short => "short",
            Builtin::UShort => "unsigned short",
            Builtin::Int => "int",
            Builtin::UInt => "unsigned int",
            Builtin::Long => "long",
            Builtin::ULong => "unsigned long",
            Builtin::LongLong => "long long",
            Builtin::ULongLong => "unsigned long long",
            Builtin::Float => "float",
            Builtin::Double => "double",
            Builtin::LongDouble => "long double",
            Builtin::Varargs => "...",
        }
    }
}

/// One step of a qualification chain: a plain identifier, or an identifier
/// with template arguments.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NameSegment {
    pub ident: String,
    pub template_args: Option<Vec<TemplateArg>>,
}

impl NameSegment {
    fn plain<S: Into<String>>(ident: S) -> NameSegment {
        NameSegment {
            ident: ident.into(),
            template_args: None,
        }
    }
}

/// A qualified name, outermost segment first.  Never empty in a well-formed
/// symbol.
///
/// Constructors and destructors store an *empty* innermost segment; the
/// identifier is implicit in the encoding and the printer reconstructs it
/// from the enclosing class segment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Name {
    pub segments: Vec<NameSegment>,
}

impl Name {
    fn single(segment: NameSegment) -> Name {
        Name {
            segments: vec![segment],
        }
    }

    /// The innermost segment's identifier, stripped of template arguments.
    /// Empty for constructors and destructors.
    pub fn base(&self) -> &str {
        match self.segments.last() {
            Some(seg) => &seg.ident,
            None => "",
        }
    }

    fn prepend(&mut self, scope: Name) {
        let mut segments = scope.segments;
        segments.append(&mut self.segments);
        self.segments = segments;
    }
}

/// A single template argument.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TemplateArg {
    Type(Type),
    Value(Type, Literal),
}

/// The literal payload of a value template argument.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Literal {
    Int(i64),
    Bool(bool),
    Char(u8),
    /// A symbol reference, used for pointer and function arguments.
    Symbol(String),
}

/// A C++ type, as a tree of tagged variants.  Mangled symbols are parsed into
/// this form first and then converted to a string.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Type {
    Builtin(Builtin),
    Named(Name),
    Ptr(Box<Type>),
    Ref(Box<Type>),
    /// The `O` code.  Prints as `&&`; see the crate docs for why this is a
    /// marker rather than a C++11 r-value reference.
    RValueRef(Box<Type>),
    /// A `T`/`N` back-reference: the slot index it named and a structural
    /// copy of the type stored there.  Prints exactly like the inner type.
    BackRef(usize, Box<Type>),
    /// Array with an optional length (`A<n>_` carries one, `A_` does not).
    Array(Option<u64>, Box<Type>),
    /// Function with an optional return type and its parameters in order.
    /// Non-template function symbols do not encode their return type.
    Function(Option<Box<Type>>, Vec<Type>),
    /// A type with qualifiers folded onto it.  Never nests directly inside
    /// another `Qualified`.
    Qualified(Qualifiers, Box<Type>),
}

impl Type {
    /// The parameter list, if this is a function type.
    pub fn function_params(&self) -> Option<&[Type]> {
        match *self {
            Type::Function(_, ref params) => Some(params),
            Type::Qualified(_, ref inner) => inner.function_params(),
            _ => None,
        }
    }

    /// The return type, if this is a function type that encodes one.
    pub fn function_return(&self) -> Option<&Type> {
        match *self {
            Type::Function(ref ret, _) => ret.as_ref().map(|t| &**t),
            Type::Qualified(_, ref inner) => inner.function_return(),
            _ => None,
        }
    }
}

/// What sort of linker symbol a parse produced.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SymbolKind {
    Function,
    Data,
    VTable,
    VThunk,
    GlobalCtorKey,
    GlobalDtorKey,
    TypeInfoNode,
    TypeInfoFn,
    /// Reserved; this dialect has no guard-variable encoding but consumers
    /// of the AST may construct one.
    GuardVariable,
}

/// The root of a successful parse.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CxxSymbol {
    pub kind: SymbolKind,
    pub name: Name,
    /// For function-like kinds this is always a `Function`; for vtables,
    /// global ctor/dtor keys and static data it is the owning scope as a
    /// `Named` type (the encoding carries no data type).
    pub ty: Type,
    pub flags: SpecialFlags,
    /// The `this` adjustment of a virtual thunk; present only for `VThunk`.
    pub thunk_delta: Option<i64>,
    /// The wrapped symbol of a thunk or global ctor/dtor key.
    pub inner: Option<Box<CxxSymbol>>,
}

// The operator table: mangled code, printable operator, arity.  The printable
// text is exactly what gets appended to "operator"; memory operators carry
// their leading space, matching the historical output.
static OPERATORS: &'static [(&'static str, &'static str, u8)] = &[
    ("nw", " new", 1),
    ("dl", " delete", 1),
    ("vn", " new[]", 1),
    ("vd", " delete[]", 1),
    ("as", "=", 2),
    ("ne", "!=", 2),
    ("eq", "==", 2),
    ("ge", ">=", 2),
    ("gt", ">", 2),
    ("le", "<=", 2),
    ("lt", "<", 2),
    ("pl", "+", 2),
    ("apl", "+=", 2),
    ("mi", "-", 2),
    ("ami", "-=", 2),
    ("ml", "*", 2),
    ("aml", "*=", 2),
    ("md", "%", 2),
    ("amd", "%=", 2),
    ("dv", "/", 2),
    ("adv", "/=", 2),
    ("aa", "&&", 2),
    ("oo", "||", 2),
    ("nt", "!", 1),
    ("pp", "++", 1),
    ("mm", "--", 1),
    ("or", "|", 2),
    ("aor", "|=", 2),
    ("er", "^", 2),
    ("aer", "^=", 2),
    ("ad", "&", 2),
    ("aad", "&=", 2),
    ("co", "~", 1),
    ("cl", "()", 0),
    ("ls", "<<", 2),
    ("als", "<<=", 2),
    ("rs", ">>", 2),
    ("ars", ">>=", 2),
    ("rf", "->", 2),
    ("vc", "[]", 2),
    ("cm", ",", 2),
    ("cn", "?:", 3),
    ("mx", ">?", 2),
    ("mn", "<?", 2),
    ("rm", "->*", 2),
    ("sz", "sizeof ", 1),
];

fn operator_symbol(code: &str) -> Option<&'static str> {
    for &(op_code, symbol, _) in OPERATORS {
        if op_code == code {
            return Some(symbol);
        }
    }
    None
}

/// The arity the historical grammar assigns to an operator code, if the code
/// is known.  `cl` reports 0 since `operator()` takes anything.
pub fn operator_arity(code: &str) -> Option<u8> {
    for &(op_code, _, arity) in OPERATORS {
        if op_code == code {
            return Some(arity);
        }
    }
    None
}

// Separators the old compilers used between name parts.  `$` and `.` were
// both in circulation, depending on what the assembler of the day accepted.
const CPLUS_MARKERS: &'static [u8] = &[b'$', b'.', b'\0'];

fn is_marker(c: u8) -> bool {
    CPLUS_MARKERS.contains(&c)
}

// The parser takes the main role in demangling.  read_* and demangle_*
// functions shorten `remaining` as they consume it; `btypes` collects the
// encodings that `T` and `N` codes may refer back to.
#[derive(Clone)]
struct ParserState<'a> {
    // Mangled symbol.  Consuming functions shorten this slice as they parse.
    remaining: &'a [u8],

    // The original input.
    input: &'a str,

    // How many bytes we advanced.
    offset: usize,

    // One slot per remembered scope or top-level parameter, in parse order.
    // `T<n>` and `N<c><n>` index this table directly, so for a member
    // function slot 0 is the enclosing class and slot k is the k-th
    // parameter.
    btypes: Vec<Type>,

    // Explicit template arguments of an `H` template function, resolved by
    // `X` codes in its parameter list and return type.
    template_args: Vec<TemplateArg>,

    constructor: bool,
    destructor: bool,
    is_static: bool,
    dll_imported: bool,
}

impl<'a> ParserState<'a> {
    fn new(input: &'a str) -> ParserState<'a> {
        ParserState {
            remaining: input.as_bytes(),
            input,
            offset: 0,
            btypes: Vec::new(),
            template_args: Vec::new(),
            constructor: false,
            destructor: false,
            is_static: false,
            dll_imported: false,
        }
    }

    fn fail(&self, kind: ErrorKind) -> Error {
        Error::new(kind, self.input, self.offset)
    }

    fn peek(&self) -> Option<u8> {
        self.remaining.first().cloned()
    }

    fn peek_at(&self, n: usize) -> Option<u8> {
        self.remaining.get(n).cloned()
    }

    fn get(&mut self) -> Result<u8> {
        match self.peek() {
            Some(first) => {
                self.advance(1);
                Ok(first)
            }
            None => Err(self.fail(ErrorKind::UnexpectedEnd)),
        }
    }

    fn consume(&mut self, s: &[u8]) -> bool {
        if self.remaining.starts_with(s) {
            self.advance(s.len());
            true
        } else {
            false
        }
    }

    fn advance(&mut self, len: usize) {
        let new_remaining = self.remaining.get(len..).unwrap_or(&[]);
        self.offset += self.remaining.len() - new_remaining.len();
        self.remaining = new_remaining;
    }

    fn expect(&mut self, c: u8) -> Result<()> {
        match self.peek() {
            Some(b) if b == c => {
                self.advance(1);
                Ok(())
            }
            Some(_) => Err(self.fail(ErrorKind::MalformedName)),
            None => Err(self.fail(ErrorKind::UnexpectedEnd)),
        }
    }

    /// Takes exactly `n` bytes as text.  Identifiers are ASCII-clean; a cut
    /// that would split a multi-byte character cannot be a valid name.
    fn take_str(&mut self, n: usize) -> Result<&'a str> {
        if self.remaining.len() < n {
            return Err(self.fail(ErrorKind::UnexpectedEnd));
        }
        let s = match self.input.get(self.offset..self.offset + n) {
            Some(s) if s.is_ascii() => s,
            _ => return Err(self.fail(ErrorKind::MalformedName)),
        };
        self.advance(n);
        Ok(s)
    }

    /// Takes the rest of the input as text.
    fn take_rest(&mut self) -> Result<&'a str> {
        let n = self.remaining.len();
        self.take_str(n)
    }

    /// Consumes the maximal run of decimal digits.  `ExpectedDigits` if the
    /// next byte is not a digit.
    fn read_number(&mut self) -> Result<u64> {
        let mut value: u64 = 0;
        let mut digits = 0;
        while let Some(c) = self.peek() {
            if !c.is_ascii_digit() {
                break;
            }
            value = value.saturating_mul(10).saturating_add(u64::from(c - b'0'));
            digits += 1;
            self.advance(1);
        }
        if digits == 0 {
            return Err(self.fail(ErrorKind::ExpectedDigits));
        }
        Ok(value)
    }

    /// Reads a count that is either a bare digit run or wrapped in
    /// underscores (`_21_`), the form used when a count exceeds nine.
    fn read_underscored_number(&mut self) -> Result<u64> {
        if self.consume(b"_") {
            let n = self.read_number()?;
            self.expect(b'_')?;
            Ok(n)
        } else {
            match self.peek() {
                Some(c) if c.is_ascii_digit() => {
                    self.advance(1);
                    Ok(u64::from(c - b'0'))
                }
                Some(_) => Err(self.fail(ErrorKind::ExpectedDigits)),
                None => Err(self.fail(ErrorKind::UnexpectedEnd)),
            }
        }
    }

    /// Reads a back-reference index: a single digit, or a longer digit run
    /// terminated by `_` (and nothing else -- `T12` is slot 1 followed by a
    /// `2`, while `T12_` is slot 12).
    fn read_backref_index(&mut self) -> Result<usize> {
        let first = match self.peek() {
            Some(c) if c.is_ascii_digit() => c,
            Some(_) => return Err(self.fail(ErrorKind::ExpectedDigits)),
            None => return Err(self.fail(ErrorKind::UnexpectedEnd)),
        };
        let mut run = 1;
        while let Some(c) = self.peek_at(run) {
            if !c.is_ascii_digit() {
                break;
            }
            run += 1;
        }
        if run > 1 && self.peek_at(run) == Some(b'_') {
            let n = self.read_number()? as usize;
            self.advance(1);
            Ok(n)
        } else {
            self.advance(1);
            Ok(usize::from(first - b'0'))
        }
    }

    fn fetch_btype(&self, index: usize) -> Result<Type> {
        match self.btypes.get(index) {
            Some(ty) => Ok(ty.clone()),
            None => Err(self.fail(ErrorKind::BackRefOutOfRange(index))),
        }
    }

    /// Reads a length-prefixed identifier such as `9ivTSolver`.  Identifiers
    /// that spell out a `_GLOBAL_$N$...` key belong to the anonymous
    /// namespace.
    fn read_class_name(&mut self) -> Result<NameSegment> {
        let n = self.read_number()? as usize;
        if n == 0 {
            return Err(self.fail(ErrorKind::MalformedName));
        }
        let s = self.take_str(n)?;
        if is_anonymous_key(s.as_bytes()) {
            Ok(NameSegment::plain("{anonymous}"))
        } else {
            Ok(NameSegment::plain(s))
        }
    }

    /// Top-level entry: classify the symbol and parse it completely.
    fn parse(&mut self) -> Result<CxxSymbol> {
        if self.remaining.is_empty() {
            return Err(self.fail(ErrorKind::UnexpectedEnd));
        }

        // Symbols re-exported from PE dynamic libraries carry an import
        // prefix in front of the real mangled name.
        if self.consume(b"__imp_") || self.consume(b"_imp__") {
            self.dll_imported = true;
        }

        // Try the special GNU forms first; the historical demangler falls
        // back to ordinary demangling when one of them does not pan out.
        let saved = self.clone();
        match self.gnu_special() {
            Ok(Some(symbol)) => return Ok(symbol),
            Ok(None) => {}
            Err(_) => *self = saved,
        }

        let base_name = self.demangle_prefix()?;
        let symbol = self.demangle_signature(base_name)?;
        if !self.remaining.is_empty() {
            return Err(self.fail(ErrorKind::TrailingGarbage(self.offset)));
        }
        Ok(symbol)
    }

    /// Parses an independent symbol embedded in this one (thunks, global
    /// ctor/dtor keys).  The nested parse gets its own back-reference table.
    fn parse_nested(&self, mangled: &str) -> Result<CxxSymbol> {
        ParserState::new(mangled).parse()
    }

    /// Process special GNU mangling forms that don't fit the normal
    /// `name__signature` pattern.  Examples:
    ///
    ///   _$_3foo                 (destructor for class foo)
    ///   _vt$foo                 (foo virtual table)
    ///   _vt$foo$bar             (foo::bar virtual table)
    ///   __vt_foo                (foo virtual table, new style with thunks)
    ///   _3foo$varname           (static data member)
    ///   __thunk_4__$_7ostream   (virtual function thunk)
    ///   __tiQ210Pedestrian8Strategy  (type_info node)
    ///
    /// Returns `Ok(None)` when the input is none of these.
    fn gnu_special(&mut self) -> Result<Option<CxxSymbol>> {
        if let Some(kind) = self.global_xtor_kind() {
            return self.demangle_global_xtor(kind).map(Some);
        }

        if self.consume(b"__thunk_") {
            return self.demangle_thunk().map(Some);
        }

        if self.remaining.len() >= 4 && self.remaining.starts_with(b"__t") {
            match self.peek_at(3) {
                Some(b'i') | Some(b'f') if self.peek_at(4).is_some() => {
                    let node = self.peek_at(3) == Some(b'i');
                    self.advance(4);
                    return self.demangle_type_info(node).map(Some);
                }
                _ => {}
            }
        }

        if self.consume(b"__vt_") {
            return self.demangle_vtable().map(Some);
        }
        if self.remaining.len() >= 4
            && self.remaining.starts_with(b"_vt")
            && is_marker(self.remaining[3])
        {
            self.advance(4);
            return self.demangle_vtable().map(Some);
        }

        if let Some(consume) = self.dtor_prefix_len() {
            self.advance(consume);
            self.destructor = true;
            let symbol = self.demangle_signature(None)?;
            if !self.remaining.is_empty() {
                return Err(self.fail(ErrorKind::TrailingGarbage(self.offset)));
            }
            return Ok(Some(symbol));
        }

        if self.looks_like_static_data() {
            return self.demangle_static_data().map(Some);
        }

        Ok(None)
    }

    fn dtor_prefix_len(&self) -> Option<usize> {
        let b = self.remaining;
        if b.len() >= 4 && b[0] == b'_' && is_marker(b[1]) && b[2] == b'_' {
            return Some(3);
        }
        if b.len() >= 5 && b[0] == b'_' && b[1] == b'_' && is_marker(b[2]) && b[3] == b'_' {
            return Some(4);
        }
        None
    }

    /// `_GLOBAL_$I$...` / `_GLOBAL_$D$...`, with `.` accepted for `$`.
    fn global_xtor_kind(&self) -> Option<SymbolKind> {
        let b = self.remaining;
        if b.len() < 12 || !b.starts_with(b"_GLOBAL_") {
            return None;
        }
        if !is_marker(b[8]) || b[8] != b[10] {
            return None;
        }
        match b[9] {
            b'I' => Some(SymbolKind::GlobalCtorKey),
            b'D' => Some(SymbolKind::GlobalDtorKey),
            _ => None,
        }
    }

    fn demangle_global_xtor(&mut self, kind: SymbolKind) -> Result<CxxSymbol> {
        self.advance(11);
        let rest = self.take_rest()?;
        if rest.is_empty() {
            return Err(self.fail(ErrorKind::UnexpectedEnd));
        }
        // The keyed symbol is itself mangled more often than not, but plain
        // identifiers appear too; fall back to the raw text for those.
        let inner = match self.parse_nested(rest) {
            Ok(symbol) => symbol,
            Err(e) if e.is_hard() => return Err(e),
            Err(_) => CxxSymbol {
                kind: SymbolKind::Data,
                name: Name::single(NameSegment::plain(rest)),
                ty: Type::Named(Name::single(NameSegment::plain(rest))),
                flags: SpecialFlags::empty(),
                thunk_delta: None,
                inner: None,
            },
        };
        let name = inner.name.clone();
        Ok(CxxSymbol {
            kind,
            ty: Type::Named(strip_implicit_segments(&name)),
            name,
            flags: self.base_flags(),
            thunk_delta: None,
            inner: Some(Box::new(inner)),
        })
    }

    /// `__thunk_<delta>_<symbol>`: an adjustor stub for a virtual call.  The
    /// delta may be negative, written with a leading `n`.
    fn demangle_thunk(&mut self) -> Result<CxxSymbol> {
        let negative = self.consume(b"n");
        let magnitude = self.read_number()? as i64;
        let delta = if negative { -magnitude } else { magnitude };
        self.expect(b'_')?;
        let rest = self.take_rest()?;
        if rest.is_empty() {
            return Err(self.fail(ErrorKind::UnexpectedEnd));
        }
        let inner = self.parse_nested(rest)?;
        Ok(CxxSymbol {
            kind: SymbolKind::VThunk,
            name: inner.name.clone(),
            ty: inner.ty.clone(),
            flags: self.base_flags() | inner.flags | SpecialFlags::IS_VIRTUAL_THUNK,
            thunk_delta: Some(delta),
            inner: Some(Box::new(inner)),
        })
    }

    /// `__ti<type>` (node) / `__tf<type>` (function).
    fn demangle_type_info(&mut self, node: bool) -> Result<CxxSymbol> {
        let ty = match self.peek() {
            Some(b'Q') | Some(b'K') => Type::Named(self.demangle_qualified()?),
            Some(b't') => Type::Named(Name::single(self.demangle_template_segment()?)),
            Some(_) => self.do_type()?,
            None => return Err(self.fail(ErrorKind::UnexpectedEnd)),
        };
        if !self.remaining.is_empty() {
            return Err(self.fail(ErrorKind::TrailingGarbage(self.offset)));
        }
        let name = match ty {
            Type::Named(ref n) => n.clone(),
            ref other => Name::single(NameSegment::plain(type_to_string(other)?)),
        };
        Ok(CxxSymbol {
            kind: if node {
                SymbolKind::TypeInfoNode
            } else {
                SymbolKind::TypeInfoFn
            },
            name,
            ty,
            flags: self.base_flags(),
            thunk_delta: None,
            inner: None,
        })
    }

    /// The vtable name is a marker-separated chain; each piece is a
    /// qualified name, a template, a counted identifier, or bare text.
    fn demangle_vtable(&mut self) -> Result<CxxSymbol> {
        let mut segments = Vec::new();
        while let Some(c) = self.peek() {
            match c {
                b'Q' | b'K' => {
                    segments.extend(self.demangle_qualified()?.segments);
                }
                b't' => {
                    segments.push(self.demangle_template_segment()?);
                }
                _ if c.is_ascii_digit() => {
                    segments.push(self.read_class_name()?);
                }
                _ => {
                    let n = self
                        .remaining
                        .iter()
                        .position(|&b| is_marker(b))
                        .unwrap_or(self.remaining.len());
                    if n == 0 {
                        return Err(self.fail(ErrorKind::MalformedName));
                    }
                    let s = self.take_str(n)?;
                    segments.push(NameSegment::plain(s));
                }
            }
            match self.peek() {
                Some(m) if is_marker(m) => {
                    self.advance(1);
                }
                Some(_) => return Err(self.fail(ErrorKind::TrailingGarbage(self.offset))),
                None => break,
            }
        }
        if segments.is_empty() {
            return Err(self.fail(ErrorKind::MalformedName));
        }
        let name = Name { segments };
        Ok(CxxSymbol {
            kind: SymbolKind::VTable,
            ty: Type::Named(name.clone()),
            name,
            flags: self.base_flags(),
            thunk_delta: None,
            inner: None,
        })
    }

    /// `_<class><marker><member>`: a static data member.  The class part may
    /// be a counted name, a `Q` chain, or a template.
    fn looks_like_static_data(&self) -> bool {
        let b = self.remaining;
        if b.len() < 2 || b[0] != b'_' {
            return false;
        }
        match b[1] {
            b'Q' | b't' => {}
            c if c.is_ascii_digit() => {}
            _ => return false,
        }
        b.iter().any(|&c| is_marker(c))
    }

    fn demangle_static_data(&mut self) -> Result<CxxSymbol> {
        self.advance(1);
        let scope = match self.peek() {
            Some(b'Q') | Some(b'K') => self.demangle_qualified()?,
            Some(b't') => Name::single(self.demangle_template_segment()?),
            _ => Name::single(self.read_class_name()?),
        };
        match self.peek() {
            Some(m) if is_marker(m) => self.advance(1),
            Some(_) => return Err(self.fail(ErrorKind::MalformedName)),
            None => return Err(self.fail(ErrorKind::UnexpectedEnd)),
        }
        let member = self.take_rest()?;
        if member.is_empty() {
            return Err(self.fail(ErrorKind::UnexpectedEnd));
        }
        let mut name = scope.clone();
        name.segments.push(NameSegment::plain(member));
        Ok(CxxSymbol {
            kind: SymbolKind::Data,
            name,
            ty: Type::Named(scope),
            flags: self.base_flags(),
            thunk_delta: None,
            inner: None,
        })
    }

    fn base_flags(&self) -> SpecialFlags {
        if self.dll_imported {
            SpecialFlags::IS_DLL_IMPORT
        } else {
            SpecialFlags::empty()
        }
    }

    /// Consume the prefix of the mangled name up to the `__` that separates
    /// the function name from the signature.  Returns the demangled base
    /// name, or `None` for constructors (whose name is implicit).
    fn demangle_prefix(&mut self) -> Result<Option<Name>> {
        let mut dunder = match find_subslice(self.remaining, b"__") {
            Some(at) => at,
            // No separator anywhere: not a function symbol.
            None => return Err(self.fail(ErrorKind::MalformedName)),
        };
        // In a run of three or more underscores the separator is the last
        // pair; everything before it belongs to the name.
        let run = count_underscores(&self.remaining[dunder..]);
        if run > 2 {
            dunder += run - 2;
        }
        let after = self.peek_at(dunder + 2);

        if dunder == 0 {
            if let Some(c) = after {
                if c.is_ascii_digit() || c == b'Q' || c == b't' || c == b'K' || c == b'H' {
                    // A GNU-style constructor: the class spec follows directly.
                    self.constructor = true;
                    self.advance(2);
                    return Ok(None);
                }
            }
            if after.map_or(true, |c| !(c.is_ascii_digit() || c == b't')) {
                // The name itself starts with `__` (operators, `__io_defs`
                // and friends); the real separator is further right.
                match find_subslice(&self.remaining[2..], b"__") {
                    Some(at) => return self.iterate_demangle_function(2 + at).map(Some),
                    None => return Err(self.fail(ErrorKind::MalformedName)),
                }
            }
        }

        if self.remaining.len() > dunder + 2 {
            return self.iterate_demangle_function(dunder).map(Some);
        }

        Err(self.fail(ErrorKind::MalformedName))
    }

    /// Find the `__` where the function name ends and the signature starts,
    /// which is ambiguous because names may contain `__` themselves.  This is
    /// a sliding window: for `foo__bar__i` we first try `foo` + `bar__i`
    /// (whose signature does not parse), then `foo__bar` + `i` (which does).
    fn iterate_demangle_function(&mut self, mut guess: usize) -> Result<Name> {
        let mut last_err: Option<Error> = None;

        loop {
            if self.peek_at(guess + 2).is_none() {
                break;
            }

            if let Some(name) = self.demangle_function_name(guess)? {
                // Trial-parse what follows as a signature on a scratch copy;
                // only commit the split once the whole signature goes through.
                let mut trial = self.clone();
                trial.advance(guess + 2);
                match trial.demangle_signature(Some(name.clone())) {
                    Ok(_) => {
                        self.advance(guess + 2);
                        return Ok(name);
                    }
                    Err(e) if e.is_hard() => return Err(e),
                    Err(e) => last_err = Some(e),
                }
            }

            // This wasn't the separator; slide to the next `__` run.
            match find_subslice(&self.remaining[guess + 2..], b"__") {
                Some(at) => {
                    let mut next = guess + 2 + at;
                    let run = count_underscores(&self.remaining[next..]);
                    if run > 2 {
                        next += run - 2;
                    }
                    guess = next;
                }
                None => break,
            }
        }

        Err(last_err.unwrap_or_else(|| self.fail(ErrorKind::MalformedName)))
    }

    /// Interpret the `guess` bytes before the separator as a function name.
    /// Operator encodings are translated; `None` means the text cannot be a
    /// name at all.
    fn demangle_function_name(&self, guess: usize) -> Result<Option<Name>> {
        let raw = match self.input.get(self.offset..self.offset + guess) {
            Some(raw) => raw,
            None => return Ok(None),
        };
        if let Some(op) = self.func_name_as_operator(raw)? {
            return Ok(Some(Name::single(NameSegment::plain(op))));
        }
        if raw == "." || raw.is_empty() {
            return Ok(None);
        }
        Ok(Some(Name::single(NameSegment::plain(raw))))
    }

    /// Recognize the operator spellings a function name can take:
    /// `op$<code>` (optionally `op$assign_<code>`), the type conversions
    /// `type$<type>` and `__op<type>`, and the usual `__<code>` form.
    fn func_name_as_operator(&self, name: &str) -> Result<Option<String>> {
        let b = name.as_bytes();

        if b.len() > 3 && b.starts_with(b"op") && is_marker(b[2]) {
            let is_assignment = name[3..].starts_with("assign_");
            let code = if is_assignment { &name[10..] } else { &name[3..] };
            if let Some(symbol) = operator_symbol(code) {
                let suffix = if is_assignment { "=" } else { "" };
                return Ok(Some(format!("operator{}{}", symbol, suffix)));
            }
            return Ok(None);
        }

        let conversion_start = if b.len() > 5 && b.starts_with(b"type") && is_marker(b[4]) {
            Some(5)
        } else if b.len() > 4 && b.starts_with(b"__op") {
            Some(4)
        } else {
            None
        };
        if let Some(start) = conversion_start {
            // The rest of the name is a type encoding; if it fails to parse
            // this is not a conversion operator after all.
            let mut sub = ParserState::new(&name[start..]);
            match sub.do_type() {
                Ok(ty) if sub.remaining.is_empty() => {
                    return Ok(Some(format!("operator {}", type_to_string(&ty)?)));
                }
                Err(e) if e.is_hard() => return Err(e),
                _ => return Ok(None),
            }
        }

        if b.len() > 3
            && b.starts_with(b"__")
            && b[2].is_ascii_lowercase()
            && b[3].is_ascii_lowercase()
        {
            if let Some(symbol) = operator_symbol(&name[2..]) {
                return Ok(Some(format!("operator{}", symbol)));
            }
        }

        Ok(None)
    }

    /// Parse the signature that follows the `__` split (or follows a special
    /// prefix): an optional scope, optional member-function qualifiers, then
    /// the parameter list and, for template functions, the return type.
    fn demangle_signature(&mut self, base_name: Option<Name>) -> Result<CxxSymbol> {
        let mut name = base_name.unwrap_or(Name {
            segments: Vec::new(),
        });
        let mut params: Vec<Type> = Vec::new();
        let mut ret: Option<Type> = None;
        let mut member_quals = Qualifiers::empty();
        let mut func_done = false;
        let mut expect_func = false;
        let mut expect_return_type = false;
        let mut xtor_applied = false;

        while let Some(c) = self.peek() {
            match c {
                b'Q' | b'K' => {
                    let scope = self.demangle_qualified()?;
                    self.btypes.push(Type::Named(scope.clone()));
                    name.prepend(scope);
                    self.apply_xtor(&mut name, &mut xtor_applied);
                    expect_func = true;
                }
                b'S' => {
                    // Static member function; the class spec must follow.
                    self.advance(1);
                    self.is_static = true;
                    match self.peek() {
                        Some(d) if d.is_ascii_digit() || d == b't' || d == b'Q' => {}
                        _ => return Err(self.fail(ErrorKind::MalformedName)),
                    }
                }
                b'C' => {
                    self.advance(1);
                    member_quals |= Qualifiers::CONST;
                }
                b'V' => {
                    self.advance(1);
                    member_quals |= Qualifiers::VOLATILE;
                }
                b'u' => {
                    self.advance(1);
                    member_quals |= Qualifiers::RESTRICT;
                }
                b'B' => {
                    return Err(self
                        .fail(ErrorKind::UnsupportedFeature("base type back-reference")));
                }
                b'F' => {
                    self.advance(1);
                    func_done = true;
                    params = self.demangle_args(true)?;
                }
                b't' => {
                    let seg = self.demangle_template_segment()?;
                    let scope = Name::single(seg);
                    self.btypes.push(Type::Named(scope.clone()));
                    name.prepend(scope);
                    self.apply_xtor(&mut name, &mut xtor_applied);
                    expect_func = true;
                }
                b'_' => {
                    // Only template functions encode a return type.
                    if !expect_return_type {
                        return Err(self.fail(ErrorKind::UnknownTypeCode(b'_')));
                    }
                    self.advance(1);
                    ret = Some(self.do_type()?);
                    expect_return_type = false;
                }
                b'H' => {
                    self.advance(1);
                    let args = self.demangle_template_args_counted()?;
                    match name.segments.last_mut() {
                        Some(last) => last.template_args = Some(args.clone()),
                        None => return Err(self.fail(ErrorKind::MalformedName)),
                    }
                    self.template_args = args;
                    if !self.constructor {
                        expect_return_type = true;
                    }
                    self.expect(b'_')?;
                }
                _ if c.is_ascii_digit() => {
                    let seg = self.read_class_name()?;
                    let scope = Name::single(seg);
                    self.btypes.push(Type::Named(scope.clone()));
                    name.prepend(scope);
                    self.apply_xtor(&mut name, &mut xtor_applied);
                    if self.peek() != Some(b'F') {
                        expect_func = true;
                    }
                }
                _ => {
                    // First outermost argument token; `bar__3fooi` carries no
                    // `F` before its parameter list.
                    func_done = true;
                    params = self.demangle_args(true)?;
                }
            }

            if expect_func {
                func_done = true;
                params = self.demangle_args(true)?;
                expect_func = false;
            }
        }

        if !func_done {
            // `bar__3foo` is `foo::bar(void)`; nothing was left for the
            // parameter list.
            params = self.demangle_args(true)?;
        }

        if name.segments.is_empty() {
            return Err(self.fail(ErrorKind::MalformedName));
        }

        let mut flags = self.base_flags();
        if self.constructor {
            flags |= SpecialFlags::IS_CONSTRUCTOR;
        }
        if self.destructor {
            flags |= SpecialFlags::IS_DESTRUCTOR;
        }
        if self.is_static {
            flags |= SpecialFlags::IS_STATIC_MEMBER_FN;
        }
        if member_quals.contains(Qualifiers::CONST) {
            flags |= SpecialFlags::IS_CONST_MEMBER_FN;
        }
        if member_quals.contains(Qualifiers::VOLATILE) {
            flags |= SpecialFlags::IS_VOLATILE_MEMBER_FN;
        }
        if member_quals.contains(Qualifiers::RESTRICT) {
            flags |= SpecialFlags::IS_RESTRICT_MEMBER_FN;
        }

        Ok(CxxSymbol {
            kind: SymbolKind::Function,
            name,
            ty: Type::Function(ret.map(Box::new), params),
            flags,
            thunk_delta: None,
            inner: None,
        })
    }

    /// Constructors and destructors get an empty innermost segment once the
    /// enclosing scope is known; the printer reconstructs the identifier.
    fn apply_xtor(&mut self, name: &mut Name, applied: &mut bool) {
        if *applied || !(self.constructor || self.destructor) {
            return;
        }
        name.segments.push(NameSegment::plain(""));
        *applied = true;
    }

    /// Process the argument list.  At the top level every parsed parameter is
    /// remembered for later `T`/`N` references; `T` and `N` themselves fetch
    /// a slot and re-remember it, so slot numbering tracks parameter
    /// positions.
    fn demangle_args(&mut self, top_level: bool) -> Result<Vec<Type>> {
        let mut args = Vec::new();
        loop {
            match self.peek() {
                None | Some(b'_') => break,
                Some(b'e') => {
                    return Err(self.fail(ErrorKind::UnsupportedFeature("ellipsis")));
                }
                Some(b'n') => {
                    return Err(self
                        .fail(ErrorKind::UnsupportedFeature("squangled argument repeat")));
                }
                Some(b'N') if top_level => {
                    self.advance(1);
                    if self.peek() == Some(b'_') {
                        return Err(self
                            .fail(ErrorKind::UnsupportedFeature("multi-digit repeat count")));
                    }
                    let count = match self.get()? {
                        d if d.is_ascii_digit() => usize::from(d - b'0'),
                        _ => return Err(self.fail(ErrorKind::ExpectedDigits)),
                    };
                    if count == 0 {
                        return Err(self.fail(ErrorKind::MalformedName));
                    }
                    let index = self.read_backref_index()?;
                    let ty = self.fetch_btype(index)?;
                    for _ in 0..count {
                        self.btypes.push(ty.clone());
                        args.push(Type::BackRef(index, Box::new(ty.clone())));
                    }
                }
                Some(b'T') if top_level => {
                    self.advance(1);
                    let index = self.read_backref_index()?;
                    let ty = self.fetch_btype(index)?;
                    self.btypes.push(ty.clone());
                    args.push(Type::BackRef(index, Box::new(ty)));
                }
                Some(_) => {
                    let ty = self.do_type()?;
                    if top_level {
                        self.btypes.push(ty.clone());
                    }
                    args.push(ty);
                }
            }
        }
        Ok(args)
    }

    /// Demangle a single type encoding.
    fn do_type(&mut self) -> Result<Type> {
        let c = match self.peek() {
            Some(c) => c,
            None => return Err(self.fail(ErrorKind::UnexpectedEnd)),
        };
        match c {
            b'P' | b'p' => {
                self.advance(1);
                Ok(Type::Ptr(Box::new(self.do_type()?)))
            }
            b'R' => {
                self.advance(1);
                Ok(Type::Ref(Box::new(self.do_type()?)))
            }
            b'O' => {
                self.advance(1);
                Ok(Type::RValueRef(Box::new(self.do_type()?)))
            }
            b'A' => {
                self.advance(1);
                let len = match self.peek() {
                    Some(d) if d.is_ascii_digit() => Some(self.read_number()?),
                    _ => None,
                };
                self.expect(b'_')?;
                Ok(Type::Array(len, Box::new(self.do_type()?)))
            }
            b'T' => {
                self.advance(1);
                let index = self.read_backref_index()?;
                let ty = self.fetch_btype(index)?;
                Ok(Type::BackRef(index, Box::new(ty)))
            }
            b'F' => {
                // A nested function type always spells out its return type:
                // `F<params>_<return>`.
                self.advance(1);
                let params = self.demangle_args(false)?;
                self.expect(b'_')?;
                let ret = self.do_type()?;
                Ok(Type::Function(Some(Box::new(ret)), params))
            }
            b'M' => Err(self.fail(ErrorKind::UnsupportedFeature("pointer to member"))),
            b'G' => {
                // Historical no-op prefix in front of named types.
                self.advance(1);
                self.do_type()
            }
            b'C' | b'V' | b'u' => {
                let mut quals = Qualifiers::empty();
                loop {
                    match self.peek() {
                        Some(b'C') => quals |= Qualifiers::CONST,
                        Some(b'V') => quals |= Qualifiers::VOLATILE,
                        Some(b'u') => quals |= Qualifiers::RESTRICT,
                        _ => break,
                    }
                    self.advance(1);
                }
                let inner = self.do_type()?;
                Ok(fold_qualifiers(quals, inner))
            }
            _ => self.demangle_fund_type(),
        }
    }

    /// Decode a fundamental type with its specifiers, e.g. `Ci` (const int),
    /// `Sl` (signed long), `CUs` (const unsigned short), or a named type.
    fn demangle_fund_type(&mut self) -> Result<Type> {
        let mut quals = Qualifiers::empty();
        loop {
            match self.peek() {
                Some(b'C') => quals |= Qualifiers::CONST,
                Some(b'V') => quals |= Qualifiers::VOLATILE,
                Some(b'u') => quals |= Qualifiers::RESTRICT,
                Some(b'U') => quals |= Qualifiers::UNSIGNED,
                Some(b'S') => quals |= Qualifiers::SIGNED,
                Some(b'J') => quals |= Qualifiers::COMPLEX,
                _ => break,
            }
            self.advance(1);
        }

        let c = match self.peek() {
            Some(c) => c,
            None => return Err(self.fail(ErrorKind::UnexpectedEnd)),
        };
        let base = match c {
            b'v' | b'b' | b'c' | b'w' | b's' | b'i' | b'l' | b'x' | b'f' | b'd' | b'r' => {
                self.advance(1);
                Type::Builtin(match c {
                    b'v' => Builtin::Void,
                    b'b' => Builtin::Bool,
                    b'c' => Builtin::Char,
                    b'w' => Builtin::WChar,
                    b's' => Builtin::Short,
                    b'i' => Builtin::Int,
                    b'l' => Builtin::Long,
                    b'x' => Builtin::LongLong,
                    b'f' => Builtin::Float,
                    b'd' => Builtin::Double,
                    _ => Builtin::LongDouble,
                })
            }
            b'G' | b'I' => {
                return Err(self.fail(ErrorKind::UnsupportedFeature("fixed-width integer type")));
            }
            b'Q' | b'K' => Type::Named(self.demangle_qualified()?),
            b't' => Type::Named(Name::single(self.demangle_template_segment()?)),
            b'X' => self.template_param_ref()?,
            b'Y' => return Err(self.fail(ErrorKind::UnsupportedFeature("template parameter"))),
            b'B' => {
                return Err(self.fail(ErrorKind::UnsupportedFeature("base type back-reference")));
            }
            _ if c.is_ascii_digit() => Type::Named(Name::single(self.read_class_name()?)),
            _ => return Err(self.fail(ErrorKind::UnknownTypeCode(c))),
        };

        let (base, quals) = merge_sign(base, quals);
        Ok(fold_qualifiers(quals, base))
    }

    /// `X<index><level>`: a reference to one of the explicit template
    /// arguments of the surrounding template function.
    fn template_param_ref(&mut self) -> Result<Type> {
        self.advance(1);
        let index = match self.get()? {
            d if d.is_ascii_digit() => usize::from(d - b'0'),
            _ => return Err(self.fail(ErrorKind::ExpectedDigits)),
        };
        // The second digit is the template nesting level; only one level is
        // ever produced by this encoding.
        if let Some(d) = self.peek() {
            if d.is_ascii_digit() {
                self.advance(1);
            }
        }
        if self.template_args.is_empty() {
            return Err(self.fail(ErrorKind::UnsupportedFeature("template parameter reference")));
        }
        match self.template_args.get(index) {
            Some(&TemplateArg::Type(ref ty)) => Ok(ty.clone()),
            Some(&TemplateArg::Value(..)) => {
                Err(self.fail(ErrorKind::UnsupportedFeature("value parameter reference")))
            }
            None => Err(self.fail(ErrorKind::BackRefOutOfRange(index))),
        }
    }

    /// Demangle a qualified name, such as `Q25Outer5Inner` for
    /// `Outer::Inner`.  Counts above nine are written `Q_<n>_`.
    fn demangle_qualified(&mut self) -> Result<Name> {
        match self.get()? {
            b'Q' => {}
            b'K' => {
                return Err(self
                    .fail(ErrorKind::UnsupportedFeature("squangled name back-reference")));
            }
            c => return Err(self.fail(ErrorKind::UnknownTypeCode(c))),
        }
        let count = match self.peek() {
            Some(b'_') => self.read_underscored_number()? as usize,
            Some(c) if c.is_ascii_digit() => {
                self.advance(1);
                if c == b'0' {
                    return Err(self.fail(ErrorKind::MalformedName));
                }
                // cfront emitted a stray underscore after the digit.
                if self.peek() == Some(b'_') {
                    self.advance(1);
                }
                usize::from(c - b'0')
            }
            Some(_) => return Err(self.fail(ErrorKind::MalformedName)),
            None => return Err(self.fail(ErrorKind::UnexpectedEnd)),
        };

        let mut segments = Vec::with_capacity(count);
        for _ in 0..count {
            if self.peek() == Some(b'_') {
                self.advance(1);
            }
            match self.peek() {
                Some(b't') => segments.push(self.demangle_template_segment()?),
                Some(b'K') => {
                    return Err(self
                        .fail(ErrorKind::UnsupportedFeature("squangled name back-reference")));
                }
                Some(c) if c.is_ascii_digit() => segments.push(self.read_class_name()?),
                Some(_) => return Err(self.fail(ErrorKind::MalformedName)),
                None => return Err(self.fail(ErrorKind::UnexpectedEnd)),
            }
        }
        Ok(Name { segments })
    }

    /// `t<name><count><args>`: a templated identifier such as
    /// `t8_Rb_tree2ZUsZUs` for `_Rb_tree<unsigned short, unsigned short>`.
    fn demangle_template_segment(&mut self) -> Result<NameSegment> {
        self.expect(b't')?;
        let base = self.read_class_name()?;
        let args = self.demangle_template_args_counted()?;
        Ok(NameSegment {
            ident: base.ident,
            template_args: Some(args),
        })
    }

    fn demangle_template_args_counted(&mut self) -> Result<Vec<TemplateArg>> {
        let count = self.read_underscored_number()? as usize;
        let mut args = Vec::with_capacity(count);
        for _ in 0..count {
            args.push(self.demangle_template_arg()?);
        }
        Ok(args)
    }

    fn demangle_template_arg(&mut self) -> Result<TemplateArg> {
        match self.peek() {
            Some(b'Z') => {
                self.advance(1);
                Ok(TemplateArg::Type(self.do_type()?))
            }
            Some(b'z') => {
                Err(self.fail(ErrorKind::UnsupportedFeature("template template parameter")))
            }
            Some(_) => {
                let ty = self.do_type()?;
                let value = self.read_template_literal(&ty)?;
                Ok(TemplateArg::Value(ty, value))
            }
            None => Err(self.fail(ErrorKind::UnexpectedEnd)),
        }
    }

    /// The literal of a value template argument, interpreted per its type.
    /// Integrals are decimal with a leading `m` for negatives; bools are
    /// `0`/`1`; pointer and function arguments name a symbol.  An `L` wraps
    /// the literal in a counted string instead.
    fn read_template_literal(&mut self, ty: &Type) -> Result<Literal> {
        if self.peek() == Some(b'L') {
            self.advance(1);
            let n = self.read_number()? as usize;
            let s = self.take_str(n)?;
            return match literal_from_text(s, ty) {
                Some(lit) => Ok(lit),
                None => Err(self.fail(ErrorKind::MalformedName)),
            };
        }
        match literal_kind(ty) {
            LiteralKind::Bool => match self.get()? {
                b'0' => Ok(Literal::Bool(false)),
                b'1' => Ok(Literal::Bool(true)),
                _ => Err(self.fail(ErrorKind::MalformedName)),
            },
            LiteralKind::Char => {
                let code = self.read_number()?;
                Ok(Literal::Char(code as u8))
            }
            LiteralKind::Int => {
                let negative = self.consume(b"m");
                let magnitude = self.read_number()? as i64;
                Ok(Literal::Int(if negative { -magnitude } else { magnitude }))
            }
            LiteralKind::Real => {
                Err(self.fail(ErrorKind::UnsupportedFeature("real-valued template parameter")))
            }
            LiteralKind::Symbol => {
                let n = self.read_number()? as usize;
                let s = self.take_str(n)?;
                Ok(Literal::Symbol(s.to_string()))
            }
            LiteralKind::Other => Err(self.fail(ErrorKind::MalformedName)),
        }
    }
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if haystack.len() < needle.len() {
        return None;
    }
    (0..=haystack.len() - needle.len()).find(|&i| haystack[i..].starts_with(needle))
}

fn count_underscores(b: &[u8]) -> usize {
    b.iter().take_while(|&&c| c == b'_').count()
}

/// `_GLOBAL_$N$<file>` buried inside a counted identifier marks a member of
/// the anonymous namespace.
fn is_anonymous_key(b: &[u8]) -> bool {
    b.len() >= 11
        && b.starts_with(b"_GLOBAL_")
        && is_marker(b[8])
        && b[9] == b'N'
        && b[8] == b[10]
}

/// Drops the empty constructor/destructor placeholder segments so the name
/// can stand alone as a type.
fn strip_implicit_segments(name: &Name) -> Name {
    Name {
        segments: name
            .segments
            .iter()
            .filter(|seg| !seg.ident.is_empty())
            .cloned()
            .collect(),
    }
}

fn fold_qualifiers(quals: Qualifiers, inner: Type) -> Type {
    if quals.is_empty() {
        return inner;
    }
    match inner {
        // Qualifiers never nest; fold into a single wrapper.
        Type::Qualified(existing, ty) => Type::Qualified(existing | quals, ty),
        other => Type::Qualified(quals, Box::new(other)),
    }
}

/// `U`/`S` select the unsigned/signed flavor of an integer type; on anything
/// else they stay behind as printed words.
fn merge_sign(ty: Type, mut quals: Qualifiers) -> (Type, Qualifiers) {
    if let Type::Builtin(b) = ty {
        if quals.contains(Qualifiers::UNSIGNED) {
            let merged = match b {
                Builtin::Char => Some(Builtin::UChar),
                Builtin::Short => Some(Builtin::UShort),
                Builtin::Int => Some(Builtin::UInt),
                Builtin::Long => Some(Builtin::ULong),
                Builtin::LongLong => Some(Builtin::ULongLong),
                _ => None,
            };
            if let Some(merged) = merged {
                quals.remove(Qualifiers::UNSIGNED);
                return (Type::Builtin(merged), quals);
            }
        }
        if quals.contains(Qualifiers::SIGNED) && b == Builtin::Char {
            quals.remove(Qualifiers::SIGNED);
            return (Type::Builtin(Builtin::SChar), quals);
        }
    }
    (ty, quals)
}

#[derive(Clone, Copy, PartialEq)]
enum LiteralKind {
    Bool,
    Char,
    Int,
    Real,
    Symbol,
    Other,
}

fn literal_kind(ty: &Type) -> LiteralKind {
    match *ty {
        Type::Qualified(_, ref inner) | Type::BackRef(_, ref inner) => literal_kind(inner),
        Type::Builtin(b) => match b {
            Builtin::Bool => LiteralKind::Bool,
            Builtin::Char | Builtin::SChar | Builtin::UChar | Builtin::WChar => LiteralKind::Char,
            Builtin::Short
            | Builtin::UShort
            | Builtin::Int
            | Builtin::UInt
            | Builtin::Long
            | Builtin::ULong
            | Builtin::LongLong
            | Builtin::ULongLong => LiteralKind::Int,
            Builtin::Float | Builtin::Double | Builtin::LongDouble => LiteralKind::Real,
            _ => LiteralKind::Other,
        },
        Type::Ptr(..) | Type::Function(..) => LiteralKind::Symbol,
        // Enumerator values arrive typed as the enum's name.
        Type::Named(_) => LiteralKind::Int,
        _ => LiteralKind::Other,
    }
}

fn literal_from_text(s: &str, ty: &Type) -> Option<Literal> {
    let kind = literal_kind(ty);
    match kind {
        LiteralKind::Bool => match s {
            "0" => Some(Literal::Bool(false)),
            "1" => Some(Literal::Bool(true)),
            _ => None,
        },
        LiteralKind::Int | LiteralKind::Char => {
            let (negative, digits) = if s.starts_with('m') {
                (true, &s[1..])
            } else {
                (false, s)
            };
            let magnitude: i64 = digits.parse().ok()?;
            let value = if negative { -magnitude } else { magnitude };
            if kind == LiteralKind::Char {
                Some(Literal::Char(value as u8))
            } else {
                Some(Literal::Int(value))
            }
        }
        LiteralKind::Symbol => Some(Literal::Symbol(s.to_string())),
        _ => None,
    }
}

impl From<io::Error> for Error {
    fn from(_: io::Error) -> Error {
        // Writing into a Vec cannot fail; this exists so `write!` composes
        // with the crate's Result.
        Error::new(ErrorKind::InvariantViolated("serializer write failed"), "", 0)
    }
}

/// Demangles a GNU v2 symbol into its printed declaration.
pub fn demangle(input: &str, flags: DemangleFlags) -> Result<String> {
    serialize(&parse(input)?, flags)
}

/// Like [`demangle`], but echoes the input back on ordinary parse failures,
/// the way `c++filt` behaves.  Internal-consistency failures still error.
pub fn demangle_lossy(input: &str, flags: DemangleFlags) -> Result<String> {
    match demangle(input, flags) {
        Ok(demangled) => Ok(demangled),
        Err(ref e) if !e.is_hard() => Ok(input.to_string()),
        Err(e) => Err(e),
    }
}

/// Parses a GNU v2 symbol into its AST without rendering it.
pub fn parse(input: &str) -> Result<CxxSymbol> {
    let mut state = ParserState::new(input);
    state.parse()
}

/// Renders a parsed symbol as a C++-style declaration.
pub fn serialize(symbol: &CxxSymbol, flags: DemangleFlags) -> Result<String> {
    let mut s = Vec::new();
    {
        let mut serializer = Serializer { flags, w: &mut s };
        serializer.serialize(symbol)?;
    }
    String::from_utf8(s)
        .map_err(|_| Error::new(ErrorKind::InvariantViolated("serializer produced bad UTF-8"), "", 0))
}

fn type_to_string(ty: &Type) -> Result<String> {
    let mut s = Vec::new();
    {
        let mut serializer = Serializer {
            flags: DemangleFlags::empty(),
            w: &mut s,
        };
        serializer.write_type(ty)?;
    }
    String::from_utf8(s)
        .map_err(|_| Error::new(ErrorKind::InvariantViolated("serializer produced bad UTF-8"), "", 0))
}

// Converts an AST to a string.
//
// Converting a C++ type to a string is tricky because of the inside-out
// declarator grammar C++ inherited from C.  If X is a pointer to a function
// returning int, the string is built from the inside out:
//
//   (1) X is a pointer: *X
//   (2) (1) is a function returning int: int (*X)()
//
// So the type is split in two: write_pre() emits the "first half" (the return
// type and the opening of any pointer parentheses), write_post() emits the
// "second half" (parameter lists, array dimensions, closing parentheses).
struct Serializer<'a> {
    flags: DemangleFlags,
    w: &'a mut Vec<u8>,
}

impl<'a> Serializer<'a> {
    fn serialize(&mut self, symbol: &CxxSymbol) -> Result<()> {
        if symbol.flags.contains(SpecialFlags::IS_DLL_IMPORT) {
            write!(self.w, "import stub for ")?;
        }
        match symbol.kind {
            SymbolKind::Function => self.write_function(symbol)?,
            SymbolKind::Data => self.write_name(&symbol.name, symbol.flags)?,
            SymbolKind::VTable => {
                self.write_name(&symbol.name, symbol.flags)?;
                write!(self.w, " virtual table")?;
            }
            SymbolKind::VThunk => {
                let inner = match symbol.inner {
                    Some(ref inner) => inner,
                    None => {
                        return Err(Error::new(
                            ErrorKind::InvariantViolated("thunk without wrapped symbol"),
                            "",
                            0,
                        ));
                    }
                };
                write!(self.w, "{} virtual thunk to ", symbol.thunk_delta.unwrap_or(0))?;
                self.serialize(inner)?;
            }
            SymbolKind::GlobalCtorKey | SymbolKind::GlobalDtorKey => {
                let what = if symbol.kind == SymbolKind::GlobalCtorKey {
                    "constructors"
                } else {
                    "destructors"
                };
                write!(self.w, "global {} keyed to ", what)?;
                match symbol.inner {
                    Some(ref inner) => self.serialize(inner)?,
                    None => self.write_name(&symbol.name, symbol.flags)?,
                }
            }
            SymbolKind::TypeInfoNode => {
                self.write_type(&symbol.ty)?;
                write!(self.w, " type_info node")?;
            }
            SymbolKind::TypeInfoFn => {
                self.write_type(&symbol.ty)?;
                write!(self.w, " type_info function")?;
            }
            SymbolKind::GuardVariable => {
                write!(self.w, "guard variable for ")?;
                self.write_name(&symbol.name, symbol.flags)?;
            }
        }
        Ok(())
    }

    fn write_function(&mut self, symbol: &CxxSymbol) -> Result<()> {
        let (ret, params) = match symbol.ty {
            Type::Function(ref ret, ref params) => (ret, params),
            _ => {
                return Err(Error::new(
                    ErrorKind::InvariantViolated("function symbol without function type"),
                    "",
                    0,
                ));
            }
        };

        if symbol.flags.contains(SpecialFlags::IS_STATIC_MEMBER_FN) {
            write!(self.w, "static ")?;
        }
        if let Some(ref ret) = *ret {
            self.write_type(ret)?;
            self.write_space()?;
        }
        self.write_name(&symbol.name, symbol.flags)?;

        if self.flags.contains(DemangleFlags::NAME_ONLY) {
            return Ok(());
        }

        if self.w.last() == Some(&b',') {
            // "operator," reads badly glued to its parameter list.
            write!(self.w, " ")?;
        }
        write!(self.w, "(")?;
        if params.is_empty() {
            // The historical demangler prints an explicit void here.
            write!(self.w, "void")?;
        } else {
            self.write_params(params)?;
        }
        write!(self.w, ")")?;

        if symbol.flags.contains(SpecialFlags::IS_CONST_MEMBER_FN) {
            write!(self.w, " const")?;
        }
        if symbol.flags.contains(SpecialFlags::IS_VOLATILE_MEMBER_FN) {
            write!(self.w, " volatile")?;
        }
        if symbol.flags.contains(SpecialFlags::IS_RESTRICT_MEMBER_FN) {
            write!(self.w, " __restrict")?;
        }
        Ok(())
    }

    fn write_type(&mut self, t: &Type) -> Result<()> {
        self.write_pre(t)?;
        self.write_post(t)
    }

    // Write the "first half" of a given type.
    fn write_pre(&mut self, t: &Type) -> Result<()> {
        match *t {
            Type::Builtin(b) => write!(self.w, "{}", b.as_str())?,
            Type::Named(ref name) => self.write_name(name, SpecialFlags::empty())?,
            Type::Ptr(ref inner) | Type::Ref(ref inner) | Type::RValueRef(ref inner) => {
                // "[]" and "()" bind tighter than "*", so a pointer to a
                // function or array needs parentheses: int (*x)(int).
                match **inner {
                    Type::Function(..) | Type::Array(..) => {
                        self.write_pre(inner)?;
                        self.write_space()?;
                        write!(self.w, "(")?;
                    }
                    _ => self.write_pre(inner)?,
                }
                self.write_space()?;
                match *t {
                    Type::Ptr(_) => write!(self.w, "*")?,
                    Type::Ref(_) => write!(self.w, "&")?,
                    _ => {
                        if self.flags.contains(DemangleFlags::NO_RVALUE_MARKER) {
                            write!(self.w, "&")?;
                        } else {
                            write!(self.w, "&&")?;
                        }
                    }
                }
            }
            Type::BackRef(_, ref inner) => self.write_pre(inner)?,
            Type::Array(_, ref inner) => self.write_pre(inner)?,
            Type::Function(ref ret, _) => match *ret {
                Some(ref ret) => self.write_pre(ret)?,
                // A function type that encodes no return prints as returning
                // void when it appears inside another type.
                None => write!(self.w, "void")?,
            },
            Type::Qualified(quals, ref inner) => match **inner {
                Type::Ptr(..)
                | Type::Ref(..)
                | Type::RValueRef(..)
                | Type::Array(..)
                | Type::Function(..) => {
                    self.write_pre(inner)?;
                    self.write_qualifier_words(quals)?;
                }
                _ => {
                    self.write_qualifier_words(quals)?;
                    self.write_space()?;
                    self.write_pre(inner)?;
                }
            },
        }
        Ok(())
    }

    // Write the "second half" of a given type.
    fn write_post(&mut self, t: &Type) -> Result<()> {
        match *t {
            Type::Ptr(ref inner) | Type::Ref(ref inner) | Type::RValueRef(ref inner) => {
                match **inner {
                    Type::Function(..) | Type::Array(..) => write!(self.w, ")")?,
                    _ => {}
                }
                self.write_post(inner)?;
            }
            Type::BackRef(_, ref inner) => self.write_post(inner)?,
            Type::Array(ref len, ref inner) => {
                match *len {
                    Some(n) => write!(self.w, "[{}]", n)?,
                    None => write!(self.w, "[]")?,
                }
                self.write_post(inner)?;
            }
            Type::Function(ref ret, ref params) => {
                write!(self.w, "(")?;
                self.write_params(params)?;
                write!(self.w, ")")?;
                if let Some(ref ret) = *ret {
                    self.write_post(ret)?;
                }
            }
            Type::Qualified(_, ref inner) => self.write_post(inner)?,
            _ => {}
        }
        Ok(())
    }

    fn write_params(&mut self, params: &[Type]) -> Result<()> {
        for (i, param) in params.iter().enumerate() {
            if i > 0 {
                write!(self.w, ", ")?;
            }
            self.write_type(param)?;
        }
        Ok(())
    }

    fn write_name(&mut self, name: &Name, flags: SpecialFlags) -> Result<()> {
        if name.segments.is_empty() {
            return Err(Error::new(
                ErrorKind::InvariantViolated("empty qualified name"),
                "",
                0,
            ));
        }
        for i in 0..name.segments.len() {
            if i > 0 {
                write!(self.w, "::")?;
            }
            let segment = &name.segments[i];
            if segment.ident.is_empty() {
                // The implicit constructor/destructor segment; its identifier
                // is the enclosing class, sans template arguments.
                let last = i + 1 == name.segments.len();
                let xtor = flags
                    .intersects(SpecialFlags::IS_CONSTRUCTOR | SpecialFlags::IS_DESTRUCTOR);
                if i == 0 || !(last && xtor) {
                    return Err(Error::new(
                        ErrorKind::InvariantViolated("nameless segment"),
                        "",
                        0,
                    ));
                }
                if flags.contains(SpecialFlags::IS_DESTRUCTOR) {
                    write!(self.w, "~")?;
                }
                write!(self.w, "{}", name.segments[i - 1].ident)?;
            } else {
                write!(self.w, "{}", segment.ident)?;
                if let Some(ref args) = segment.template_args {
                    self.write_template_args(args)?;
                }
            }
        }
        Ok(())
    }

    fn write_template_args(&mut self, args: &[TemplateArg]) -> Result<()> {
        write!(self.w, "<")?;
        for (i, arg) in args.iter().enumerate() {
            if i > 0 {
                write!(self.w, ", ")?;
            }
            match *arg {
                TemplateArg::Type(ref ty) => self.write_type(ty)?,
                TemplateArg::Value(_, ref literal) => self.write_literal(literal)?,
            }
        }
        write!(self.w, ">")?;
        Ok(())
    }

    fn write_literal(&mut self, literal: &Literal) -> Result<()> {
        match *literal {
            Literal::Int(value) => write!(self.w, "{}", value)?,
            Literal::Bool(value) => write!(self.w, "{}", if value { "true" } else { "false" })?,
            Literal::Char(code) => {
                if code.is_ascii_graphic() || code == b' ' {
                    write!(self.w, "'{}'", char::from(code))?;
                } else {
                    write!(self.w, "{}", code)?;
                }
            }
            Literal::Symbol(ref name) => write!(self.w, "&{}", name)?,
        }
        Ok(())
    }

    fn write_qualifier_words(&mut self, quals: Qualifiers) -> Result<()> {
        let words = [
            (Qualifiers::CONST, "const"),
            (Qualifiers::VOLATILE, "volatile"),
            (Qualifiers::RESTRICT, "__restrict"),
            (Qualifiers::SIGNED, "signed"),
            (Qualifiers::UNSIGNED, "unsigned"),
            (Qualifiers::COMPLEX, "__complex"),
        ];
        for &(flag, word) in words.iter() {
            if quals.contains(flag) {
                self.write_space()?;
                write!(self.w, "{}", word)?;
            }
        }
        Ok(())
    }

    fn write_space(&mut self) -> Result<()> {
        if let Some(&c) = self.w.last() {
            if c.is_ascii_alphanumeric() || c == b'_' || c == b'>' || c == b')' {
                write!(self.w, " ")?;
            }
        }
        Ok(())
    }
}

// Grammar sketch, after gcc's gnu mangling (cplus-dem.c):
//
// <mangled-name> ::= <prefix> __ <signature>
//                ::= __ <class-spec> <args>             # constructor
//                ::= _ <marker> _ <class-spec> <args>   # destructor
//                ::= _vt <marker> <chain>               # virtual table
//                ::= __thunk_ <delta> _ <mangled-name>
//                ::= _GLOBAL_ <marker> I/D <marker> <mangled-name>
// <signature>    ::= [S] [<cv>...] <class-spec>... [F] <args> [_ <type>]
// <class-spec>   ::= <count> <identifier>
//                ::= Q <count> <class-spec>...
//                ::= t <count> <identifier> <count> <template-arg>...
// <type>         ::= [C|V|u]... (P|R|O|A<dim>_|F<args>_<type>|T<slot>) <type>
//                ::= [C|V|u|U|S|J]... <fundamental or named type>
// <template-arg> ::= Z <type>
//                ::= <type> <literal>

