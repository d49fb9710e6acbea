#[test]
fn ui() {
    let t = trybuild::TestCases::new();
    t.pass("tests/ui/command_basic.rs");
    t.pass("tests/ui/command_validate.rs");
    t.pass("tests/ui/query_basic.rs");
    t.pass("tests/ui/identifiable_basic.rs");
    t.pass("tests/ui/identifiable_default.rs");
}
