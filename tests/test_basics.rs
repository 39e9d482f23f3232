extern crate gnu2_demangler;

use gnu2_demangler::{demangle, DemangleFlags};

fn expect(input: &str, reference: &str) {
    let demangled = demangle(input, DemangleFlags::empty());
    match demangled {
        Ok(demangled) => assert_eq!(demangled, reference, "mangled: {}", input),
        Err(err) => panic!("failed to demangle {:?}: {}", input, err),
    }
}

fn expect_name(input: &str, reference: &str) {
    let demangled = demangle(input, DemangleFlags::NAME_ONLY);
    match demangled {
        Ok(demangled) => assert_eq!(demangled, reference, "mangled: {}", input),
        Err(err) => panic!("failed to demangle {:?}: {}", input, err),
    }
}

#[test]
fn basic_functions() {
    expect("saveOnQuitOverlay__Fv", "saveOnQuitOverlay(void)");
    expect("textShake__FiPi", "textShake(int, int *)");
    expect("InitRTState__5Shell", "Shell::InitRTState(void)");
    expect("Check__6UArrayi", "UArray::Check(int)");
    expect(
        "updateBlimpWeaponState__16PrisonLevelSoundii",
        "PrisonLevelSound::updateBlimpWeaponState(int, int)",
    );
    expect("Round__Ff", "Round(float)");
}

#[test]
fn qualified_class_names() {
    expect(
        "AddAlignment__9ivTSolverUiP12ivInteractorP7ivTGlue",
        "ivTSolver::AddAlignment(unsigned int, ivInteractor *, ivTGlue *)",
    );
    expect(
        "ArrowheadIntersects__9ArrowLineP9ArrowheadR6BoxObjP7Graphic",
        "ArrowLine::ArrowheadIntersects(Arrowhead *, BoxObj &, Graphic *)",
    );
    expect("AtEnd__13ivRubberGroup", "ivRubberGroup::AtEnd(void)");
    expect(
        "BgFilter__9ivTSolverP12ivInteractor",
        "ivTSolver::BgFilter(ivInteractor *)",
    );
    expect(
        "CoreConstDecls__8TextCodeR7ostream",
        "TextCode::CoreConstDecls(ostream &)",
    );
    expect(
        "CoreConstDecls__8TextCodeO7ostream",
        "TextCode::CoreConstDecls(ostream &&)",
    );
    expect(
        "Detach__8StateVarP12StateVarView",
        "StateVar::Detach(StateVarView *)",
    );
    // A stray `G` in front of a named argument is skipped.
    expect("Done__9ComponentG8Iterator", "Component::Done(Iterator)");
    expect("Effect__11RelateManipR7ivEvent", "RelateManip::Effect(ivEvent &)");
    expect(
        "Effect__11RelateManipO7ivEvent",
        "RelateManip::Effect(ivEvent &&)",
    );
    expect(
        "IsAGroup__FP11GraphicViewP11GraphicComp",
        "IsAGroup(GraphicView *, GraphicComp *)",
    );
    expect("IsA__10ButtonCodeUl", "ButtonCode::IsA(unsigned long)");
    expect("ReadName__FR7istreamPc", "ReadName(istream &, char *)");
    expect(
        "Redraw__13StringBrowseriiii",
        "StringBrowser::Redraw(int, int, int, int)",
    );
    expect("Rotate__13ivTransformerf", "ivTransformer::Rotate(float)");
    expect(
        "SetExport__16MemberSharedNameUi",
        "MemberSharedName::SetExport(unsigned int)",
    );
    expect(
        "InsertBody__15H_PullrightMenuii",
        "H_PullrightMenu::InsertBody(int, int)",
    );
    expect(
        "InsertCharacter__9TextManipc",
        "TextManip::InsertCharacter(char)",
    );
    expect("Set__5DFacePcii", "DFace::Set(char *, int, int)");
}

#[test]
fn stacked_memory_tokens() {
    // Multiple memory tokens hug each other.
    expect("FindFixed__FRP4CNetP4CNet", "FindFixed(CNet *&, CNet *)");
    expect("FindFixed__FOP4CNetP4CNet", "FindFixed(CNet *&&, CNet *)");
}

#[test]
fn single_underscores_in_names() {
    expect("Fix48_abort__FR8twolongs", "Fix48_abort(twolongs &)");
    expect("Fix48_abort__FO8twolongs", "Fix48_abort(twolongs &&)");
}

#[test]
fn const_member_functions() {
    expect("GetBgColor__C9ivPainter", "ivPainter::GetBgColor(void) const");
    expect(
        "Rotated__C13ivTransformerf",
        "ivTransformer::Rotated(float) const",
    );
}

#[test]
fn enum_argument_stays_out_of_scope() {
    expect(
        "Set__14ivControlState13ControlStatusUi",
        "ivControlState::Set(ControlStatus, unsigned int)",
    );
}

#[test]
fn backreferenced_types() {
    expect(
        "GetBarInfo__15iv2_6_VScrollerP13ivPerspectiveRiT2",
        "iv2_6_VScroller::GetBarInfo(ivPerspective *, int &, int &)",
    );
    expect(
        "GetBarInfo__15iv2_6_VScrollerP13ivPerspectiveOiT2",
        "iv2_6_VScroller::GetBarInfo(ivPerspective *, int &&, int &&)",
    );
    expect(
        "InsertToplevel__7ivWorldP12ivInteractorT1",
        "ivWorld::InsertToplevel(ivInteractor *, ivInteractor *)",
    );
    expect(
        "InsertToplevel__7ivWorldP12ivInteractorT1iiUi",
        "ivWorld::InsertToplevel(ivInteractor *, ivInteractor *, int, int, unsigned int)",
    );
    expect(
        "VConvert__9ivTSolverP12ivInteractorRP8TElementT2",
        "ivTSolver::VConvert(ivInteractor *, TElement *&, TElement *&)",
    );
    expect(
        "VConvert__9ivTSolverP7ivTGlueRP8TElement",
        "ivTSolver::VConvert(ivTGlue *, TElement *&)",
    );
    expect(
        "VOrder__9ivTSolverUiRP12ivInteractorT2",
        "ivTSolver::VOrder(unsigned int, ivInteractor *&, ivInteractor *&)",
    );
}

#[test]
fn operator_overloads() {
    expect("__aml__5Fix16i", "Fix16::operator*=(int)");
    expect("__aa__3fooRT0", "foo::operator&&(foo &)");
    expect("__aad__3fooRT0", "foo::operator&=(foo &)");
    expect("__ad__3fooRT0", "foo::operator&(foo &)");
    expect("__adv__3fooRT0", "foo::operator/=(foo &)");
    expect("__aer__3fooRT0", "foo::operator^=(foo &)");
    expect("__als__3fooRT0", "foo::operator<<=(foo &)");
    expect("__amd__3fooRT0", "foo::operator%=(foo &)");
    expect("__ami__3fooRT0", "foo::operator-=(foo &)");
    expect("__aml__3FixRT0", "Fix::operator*=(Fix &)");
    expect("__aml__5Fix32RT0", "Fix32::operator*=(Fix32 &)");
    expect("__aor__3fooRT0", "foo::operator|=(foo &)");
    expect("__apl__3fooRT0", "foo::operator+=(foo &)");
    expect("__ars__3fooRT0", "foo::operator>>=(foo &)");
    expect("__as__3fooRT0", "foo::operator=(foo &)");
    expect("__cl__3fooRT0", "foo::operator()(foo &)");
    expect("__cl__6Normal", "Normal::operator()(void)");
    expect("__cl__6Stringii", "String::operator()(int, int)");
    expect("__cm__3fooRT0", "foo::operator, (foo &)");
    expect("__co__3foo", "foo::operator~(void)");
    expect("__dl__3fooPv", "foo::operator delete(void *)");
    expect("__dv__3fooRT0", "foo::operator/(foo &)");
    expect("__eq__3fooRT0", "foo::operator==(foo &)");
}

#[test]
fn conversion_operators() {
    expect("__opi__1X", "X::operator int(void)");
    expect("__opPc__1X", "X::operator char *(void)");
}

#[test]
fn constructors() {
    expect(
        "__10ivTelltaleiP7ivGlyph",
        "ivTelltale::ivTelltale(int, ivGlyph *)",
    );
    expect(
        "__10ivViewportiP12ivInteractorUi",
        "ivViewport::ivViewport(int, ivInteractor *, unsigned int)",
    );
    expect("__10ostrstream", "ostrstream::ostrstream(void)");
    expect(
        "__10ostrstreamPcii",
        "ostrstream::ostrstream(char *, int, int)",
    );
    expect("__11BitmapTablei", "BitmapTable::BitmapTable(int)");
    expect(
        "__12ViewportCodeP12ViewportComp",
        "ViewportCode::ViewportCode(ViewportComp *)",
    );
    expect("__12iv2_6_Borderii", "iv2_6_Border::iv2_6_Border(int, int)");
    expect("__12ivBreak_Listl", "ivBreak_List::ivBreak_List(long)");
    expect(
        "__14iv2_6_MenuItemiP12ivInteractor",
        "iv2_6_MenuItem::iv2_6_MenuItem(int, ivInteractor *)",
    );
    expect(
        "__20DisplayList_IteratorR11DisplayList",
        "DisplayList_Iterator::DisplayList_Iterator(DisplayList &)",
    );
    expect("__3fooRT0", "foo::foo(foo &)");
    expect("__3fooiN31", "foo::foo(int, int, int, int)");
    expect(
        "__3fooiRT0iT2iT2",
        "foo::foo(int, foo &, int, foo &, int, foo &)",
    );
    expect("__6KeyMapPT0", "KeyMap::KeyMap(KeyMap *)");
    expect(
        "__8ArrowCmdP6EditorUiUi",
        "ArrowCmd::ArrowCmd(Editor *, unsigned int, unsigned int)",
    );
    expect(
        "__9F_EllipseiiiiP7Graphic",
        "F_Ellipse::F_Ellipse(int, int, int, int, Graphic *)",
    );
    expect(
        "__9FrameDataP9FrameCompi",
        "FrameData::FrameData(FrameComp *, int)",
    );
    expect(
        "__9HVGraphicP9CanvasVarP7Graphic",
        "HVGraphic::HVGraphic(CanvasVar *, Graphic *)",
    );
    expect("__Q23foo3bar", "foo::bar::bar(void)");
    expect("__Q33foo3bar4bell", "foo::bar::bell::bell(void)");
}

#[test]
fn destructors() {
    expect("_$_10BitmapComp", "BitmapComp::~BitmapComp(void)");
    expect("_$_9__io_defs", "__io_defs::~__io_defs(void)");
    expect("_$_Q23foo3bar", "foo::bar::~bar(void)");
    expect("_$_Q33foo3bar4bell", "foo::bar::bell::~bell(void)");
}

#[test]
fn class_templates() {
    expect(
        "find__t8_Rb_tree2ZUsZUs",
        "_Rb_tree<unsigned short, unsigned short>::find(void)",
    );
    expect(
        "find__t8_Rb_tree5ZUsZt4pair2ZCUsZUsZt10_Select1st1Zt4pair2ZCUsZUsZt4less1ZUsZt9allocator1ZUsRCUs",
        "_Rb_tree<unsigned short, pair<const unsigned short, unsigned short>, _Select1st<pair<const unsigned short, unsigned short>>, less<unsigned short>, allocator<unsigned short>>::find(const unsigned short &)",
    );
    expect(
        "_$_t13_Rb_tree_base2Zt4pair2ZCUsZUsZt9allocator1ZUs",
        "_Rb_tree_base<pair<const unsigned short, unsigned short>, allocator<unsigned short>>::~_Rb_tree_base(void)",
    );
    expect(
        "_$_t3map4ZUsZUsZt4less1ZUsZt9allocator1ZUs",
        "map<unsigned short, unsigned short, less<unsigned short>, allocator<unsigned short>>::~map(void)",
    );
    expect(
        "_S_oom_malloc__t23__malloc_alloc_template1i0Ui",
        "__malloc_alloc_template<0>::_S_oom_malloc(unsigned int)",
    );
    expect(
        "_S_chunk_alloc__t24__default_alloc_template2b0i0UiRi",
        "__default_alloc_template<false, 0>::_S_chunk_alloc(unsigned int, int &)",
    );
    expect(
        "_M_insert__t8_Rb_tree5ZUiZt4pair2ZCUiZUsZt10_Select1st1Zt4pair2ZCUiZUsZt4less1ZUiZt9allocator1ZUsP18_Rb_tree_node_baseT1RCt4pair2ZCUiZUs",
        "_Rb_tree<unsigned int, pair<const unsigned int, unsigned short>, _Select1st<pair<const unsigned int, unsigned short>>, less<unsigned int>, allocator<unsigned short>>::_M_insert(_Rb_tree_node_base *, _Rb_tree_node_base *, const pair<const unsigned int, unsigned short> &)",
    );
}

#[test]
fn template_constructors() {
    expect("__t6vector1Zii", "vector<int>::vector(int)");
}

#[test]
fn nested_function_types() {
    expect(
        "dbsTraverse__FPP9_hierheadPFP9_hierheadP8_fvectorPA3_f_vP8_fvector",
        "dbsTraverse(_hierhead **, void (*)(_hierhead *, _fvector *, float (*)[3]), _fvector *)",
    );
}

#[test]
fn template_functions() {
    expect(
        "lexicographical_compare__H2ZPCScZPCSc_X01X11_b",
        "bool lexicographical_compare<const signed char *, const signed char *>(const signed char *, const signed char *)",
    );
}

#[test]
fn name_only_rendering() {
    expect_name(
        "AddAlignment__9ivTSolverUiP12ivInteractorP7ivTGlue",
        "ivTSolver::AddAlignment",
    );
    expect_name("saveOnQuitOverlay__Fv", "saveOnQuitOverlay");
    expect_name("__10ivTelltaleiP7ivGlyph", "ivTelltale::ivTelltale");
    expect_name("_$_Q23foo3bar", "foo::bar::~bar");
    expect_name("__aml__5Fix16i", "Fix16::operator*=");
    expect_name("GetBgColor__C9ivPainter", "ivPainter::GetBgColor");
    expect_name(
        "lexicographical_compare__H2ZPCScZPCSc_X01X11_b",
        "bool lexicographical_compare<const signed char *, const signed char *>",
    );
}

#[test]
fn rvalue_marker_can_be_suppressed() {
    let flags = DemangleFlags::NO_RVALUE_MARKER;
    let demangled =
        demangle("GetBarInfo__15iv2_6_VScrollerP13ivPerspectiveOiT2", flags).unwrap();
    assert_eq!(
        demangled,
        "iv2_6_VScroller::GetBarInfo(ivPerspective *, int &, int &)"
    );
}
