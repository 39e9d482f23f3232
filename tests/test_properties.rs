extern crate gnu2_demangler;

use gnu2_demangler::{demangle, demangle_lossy, parse, DemangleFlags, SymbolKind, Type};

// A cross-section of every symbol shape the parser accepts.
static CORPUS: &'static [&'static str] = &[
    "saveOnQuitOverlay__Fv",
    "textShake__FiPi",
    "InitRTState__5Shell",
    "AddAlignment__9ivTSolverUiP12ivInteractorP7ivTGlue",
    "GetBarInfo__15iv2_6_VScrollerP13ivPerspectiveOiT2",
    "GetBgColor__C9ivPainter",
    "__aml__5Fix16i",
    "__opi__1X",
    "__10ivTelltaleiP7ivGlyph",
    "__Q33foo3bar4bell",
    "_$_10BitmapComp",
    "_$_t3map4ZUsZUsZt4less1ZUsZt9allocator1ZUs",
    "__3fooiN31",
    "__6KeyMapPT0",
    "find__t8_Rb_tree2ZUsZUs",
    "_S_chunk_alloc__t24__default_alloc_template2b0i0UiRi",
    "lexicographical_compare__H2ZPCScZPCSc_X01X11_b",
    "dbsTraverse__FPP9_hierheadPFP9_hierheadP8_fvectorPA3_f_vP8_fvector",
    "_vt$10AttractPed",
    "_vt$foo$bar",
    "__tiQ210Pedestrian8Strategy",
    "__tfUx",
    "_GLOBAL_$I$__Q27CsColor4Data",
    "_GLOBAL_$D$hudInfo",
    "_10PageButton$__both",
    "__thunk_4__$_7ostream",
];

// Accepted inputs always render to a non-empty declaration.
#[test]
fn accepted_inputs_render_non_empty() {
    for input in CORPUS {
        let rendered = demangle(input, DemangleFlags::empty())
            .unwrap_or_else(|e| panic!("corpus entry {:?} failed: {}", input, e));
        assert!(!rendered.is_empty(), "empty rendering for {:?}", input);
    }
}

// Every byte string either demangles or comes back verbatim.
#[test]
fn lossy_demangling_echoes_or_demangles() {
    let garbage = [
        "aa__aa",
        "",
        "_",
        "__",
        "____",
        "f__",
        "f__Q9",
        "f__Fq",
        "f__FT9",
        "x__FB1x",
        "N3",
        "__thunk_9",
        "_GLOBAL_$X$foo",
        "__thunk_zz_foo__Fv",
    ];
    for input in garbage.iter() {
        let out = demangle_lossy(input, DemangleFlags::empty()).unwrap();
        assert_eq!(&out, input, "garbage input {:?} was not echoed", input);
    }
    for input in CORPUS {
        let out = demangle_lossy(input, DemangleFlags::empty()).unwrap();
        assert_ne!(&out, input, "corpus entry {:?} failed to demangle", input);
    }
}

// Folding a qualifier onto an already-qualified type changes nothing: `CCi`
// and `Ci` carry the same qualifier set.
#[test]
fn qualifier_folding_is_idempotent() {
    let once = demangle("f__FCi", DemangleFlags::empty()).unwrap();
    let twice = demangle("f__FCCi", DemangleFlags::empty()).unwrap();
    assert_eq!(once, twice);
    assert_eq!(once, "f(const int)");

    let sym_once = parse("f__FCi").unwrap();
    let sym_twice = parse("f__FCCi").unwrap();
    assert_eq!(sym_once.ty, sym_twice.ty);
}

// A back-referenced parameter resolves to a structural copy of the slot it
// names, and the slot is always in range at the moment of reference.
#[test]
fn backrefs_resolve_to_structural_copies() {
    let symbol = parse("GetBarInfo__15iv2_6_VScrollerP13ivPerspectiveOiT2").unwrap();
    assert_eq!(symbol.kind, SymbolKind::Function);
    let params = symbol.ty.function_params().expect("function symbol");
    assert_eq!(params.len(), 3);
    match params[2] {
        Type::BackRef(index, ref inner) => {
            // Slot 2: slot 0 is the class, slot k the k-th parameter.
            assert_eq!(index, 2);
            assert_eq!(**inner, params[1]);
        }
        ref other => panic!("expected a back-reference, got {:?}", other),
    }
}

// The parameter list the AST reports matches what the encoding spelled out.
#[test]
fn parameter_counts_match_encoding() {
    let cases: &[(&str, usize)] = &[
        ("saveOnQuitOverlay__Fv", 1),
        ("AddAlignment__9ivTSolverUiP12ivInteractorP7ivTGlue", 3),
        ("__3fooiN31", 4),
        ("__3fooiRT0iT2iT2", 6),
        ("Redraw__13StringBrowseriiii", 4),
        ("InitRTState__5Shell", 0),
    ];
    for &(input, count) in cases {
        let symbol = parse(input).unwrap();
        let params = symbol.ty.function_params().expect("function symbol");
        assert_eq!(params.len(), count, "wrong arity for {:?}", input);
    }
}

#[test]
fn name_accessors() {
    let symbol = parse("find__t8_Rb_tree2ZUsZUs").unwrap();
    assert_eq!(symbol.name.base(), "find");
    assert_eq!(symbol.name.segments.len(), 2);
    assert_eq!(symbol.name.segments[0].ident, "_Rb_tree");
    assert!(symbol.name.segments[0].template_args.is_some());

    // Constructors keep their implicit innermost segment empty.
    let ctor = parse("__Q23foo3bar").unwrap();
    assert_eq!(ctor.name.base(), "");
    assert_eq!(ctor.name.segments.len(), 3);
}

#[test]
fn operator_table_reports_arity() {
    assert_eq!(gnu2_demangler::operator_arity("pl"), Some(2));
    assert_eq!(gnu2_demangler::operator_arity("nt"), Some(1));
    assert_eq!(gnu2_demangler::operator_arity("cl"), Some(0));
    assert_eq!(gnu2_demangler::operator_arity("zz"), None);
}
