//! End-to-end pipeline tests: compile source text and assert on emitted
//! error codes and resulting types.

use numerobis::{ast::AstNode, compile_source};

fn err_code(source: &str) -> u16 {
    match compile_source(source) {
        Err(diagnostic) => diagnostic.code,
        Ok(_) => panic!("expected a diagnostic for:\n{source}"),
    }
}

fn name_type(source: &str, name: &str) -> String {
    let compiled = compile_source(source).unwrap();
    compiled.namespaces.names[name].to_string()
}

// ---------------------------------------------------------------- scenarios

#[test]
fn s1_literal_conversion_to_base_units() {
    let compiled = compile_source("unit m\nunit km = 1000 m\nx: Float[m] = 5 km\n").unwrap();
    let values: Vec<String> = compiled
        .namespaces
        .nodes
        .values()
        .filter_map(|node| match node {
            AstNode::Integer(lit) | AstNode::Float(lit) => Some(lit.value.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(values, vec!["5000".to_owned()]);
}

#[test]
fn s2_sum_requires_a_single_base() {
    assert_eq!(err_code("unit m\nunit s\nx = 1 m + 1 s\n"), 703);
}

#[test]
fn s3_affine_units_are_logarithmic_and_convert() {
    let source = "dimension T\nunit K : T\nunit F = 5/9 * (_ - 32)\nx = 1 F\ny = x -> K\n";
    let compiled = compile_source(source).unwrap();
    assert!(compiled.units.logarithmic.contains("F"));
    // the conversion lowers to the inverse conversion function
    assert!(compiled.main.contains("nbs_inv_K"));
    // and y carries the target dimension
    assert_eq!(name_type(source, "y"), "Int[T]");
}

#[test]
fn s4_recursion_without_annotation() {
    let source = "f!(n) = if n < 1 then 0 else f(n - 1) + 1\ny = f(3)\n";
    assert_eq!(err_code(source), 508);
}

#[test]
fn s4_recursion_with_parameter_annotation_only() {
    // the body is checked eagerly, so the guard fires without a call
    let source = "f!(n: Int) = if n < 1 then 0 else f(n - 1) + 1\n";
    assert_eq!(err_code(source), 508);
}

#[test]
fn s4_annotated_recursion_is_fine() {
    let source = "f!(n: Int): Int = if n < 1 then 0 else f(n - 1) + 1\ny = f(3)\n";
    assert_eq!(name_type(source, "y"), "Int");
}

#[test]
fn s5_generic_list_operations() {
    let source = "xs = [1, 2, 3]\ny = xs[0]\n";
    assert_eq!(name_type(source, "xs"), "List[Int]");
    assert_eq!(name_type(source, "y"), "Int");

    assert_eq!(err_code("xs = [1, \"a\"]\n"), 525);
}

#[test]
fn s6_division_yields_an_inverse_dimension() {
    let source = "unit m\nunit s\nv: Float[m/s] = 10 m / 2 s\n";
    let rendered = name_type(source, "v");
    assert!(rendered.starts_with("Float["), "got {rendered}");
    assert!(rendered.contains('M') && rendered.contains("S^-1"), "got {rendered}");
}

// ----------------------------------------------------------- dimensionality

#[test]
fn mul_combines_dimensions() {
    let source = "unit m\na = 2 m * 3 m\n";
    assert_eq!(name_type(source, "a"), "Int[M^2]");
}

#[test]
fn pow_needs_dimensionless_exponent() {
    assert_eq!(err_code("unit m\nunit s\nx = (2 m) ^ (2 s)\n"), 101);
}

#[test]
fn pow_raises_the_dimension() {
    let source = "unit m\na = (2 m) ^ 2\n";
    assert_eq!(name_type(source, "a"), "Int[M^2]");
}

#[test]
fn mod_requires_matching_dimensions() {
    assert_eq!(err_code("unit m\nunit s\nx = 5 m % 2 s\n"), 703);
}

#[test]
fn dimensioned_index_is_rejected() {
    assert_eq!(err_code("unit m\nxs = [1, 2]\ny = xs[1 m]\n"), 537);
}

#[test]
fn conversion_between_incompatible_dimensions() {
    assert_eq!(
        err_code("unit m\nunit s\nx = 5 m\ny = x -> s\n"),
        515
    );
}

#[test]
fn display_conversion_typechecks_like_semantic() {
    let source = "unit m\nunit km = 1000 m\nx = 5000 m\ny = x (-> km)\n";
    let compiled = compile_source(source).unwrap();
    assert!(compiled.main.contains("nbs_inv_km"));
}

// ------------------------------------------------------------------- types

#[test]
fn operator_type_mismatch() {
    assert_eq!(err_code("x = 1 + \"a\"\n"), 502);
    assert_eq!(err_code("x = true * 2\n"), 502);
}

#[test]
fn string_concat_and_repeat() {
    assert_eq!(name_type("x = \"a\" + \"b\"\n", "x"), "Str");
    assert_eq!(name_type("x = \"ab\" * 3\n", "x"), "Str");
}

#[test]
fn list_concat_is_generic() {
    assert_eq!(name_type("x = [1] + [2, 3]\n", "x"), "List[Int]");
    assert_eq!(err_code("x = [1] + [\"a\"]\n"), 502);
}

#[test]
fn comparison_chains() {
    assert_eq!(name_type("x = 1 < 2\n", "x"), "Bool");
    assert_eq!(name_type("x = 1 < 2 < 3\n", "x"), "Bool");
    assert_eq!(err_code("x = 1 < \"a\"\n"), 514);
}

#[test]
fn condition_must_be_boolish() {
    assert_eq!(err_code("f!(): Int = 1\nx = if f then 1 else 2\n"), 520);
}

#[test]
fn if_branches_must_agree() {
    assert_eq!(err_code("x = if true then 1 else \"a\"\n"), 521);
}

#[test]
fn non_callable_values() {
    assert_eq!(err_code("x = 5\ny = x(1)\n"), 506);
}

#[test]
fn unknown_names_are_reported() {
    assert_eq!(err_code("x = undefined_thing\n"), 601);
}

#[test]
fn range_endpoint_rules() {
    assert_eq!(name_type("r = 0..10\n", "r"), "Range");
    assert_eq!(err_code("r = 0.5..10\n"), 526);
    assert_eq!(err_code("unit m\nr = (1 m)..10\n"), 527);
    assert_eq!(err_code("r = 0..10..\"a\"\n"), 528);
}

#[test]
fn slice_indices_must_be_ints() {
    assert_eq!(name_type("xs = [1, 2, 3]\ny = xs[0:2]\n", "y"), "List[Int]");
    assert_eq!(err_code("xs = [1, 2, 3]\ny = xs[0:\"a\"]\n"), 532);
}

#[test]
fn for_loops_iterate_lists_and_ranges() {
    let source = "t = 0\nfor i in 0..3 do {\n  echo(i)\n}\nfor x in [1, 2] do {\n  echo(x)\n}\n";
    compile_source(source).unwrap();
    assert_eq!(err_code("for x in 5 do {\n  echo(x)\n}\n"), 516);
    assert_eq!(err_code("for a, b in [1, 2] do {\n  echo(a)\n}\n"), 517);
}

#[test]
fn return_outside_function() {
    assert_eq!(err_code("return 5\n"), 530);
}

#[test]
fn return_type_must_match_annotation() {
    assert_eq!(err_code("f!(): Int = {\n  return \"a\"\n}\n"), 519);
}

#[test]
fn unary_operators() {
    assert_eq!(name_type("x = -5\n", "x"), "Int");
    assert_eq!(name_type("x = not true\n", "x"), "Bool");
    assert_eq!(err_code("x = -\"a\"\n"), 533);
}

// --------------------------------------------------------------- functions

#[test]
fn named_and_default_arguments() {
    let source = "f!(a: Int, b: Int = 10): Int = a + b\nx = f(1)\ny = f(1, b = 2)\nz = f(b = 2, a = 1)\n";
    assert_eq!(name_type(source, "x"), "Int");

    let base = "f!(a: Int, b: Int = 10): Int = a + b\n";
    assert_eq!(err_code(&format!("{base}x = f()\n")), 512);
    assert_eq!(err_code(&format!("{base}x = f(1, c = 2)\n")), 510);
    assert_eq!(err_code(&format!("{base}x = f(a = 1, a = 2)\n")), 509);
    assert_eq!(err_code(&format!("{base}x = f(b = 2, 1)\n")), 511);
    assert_eq!(err_code(&format!("{base}x = f(\"a\")\n")), 513);
}

#[test]
fn default_must_match_annotation() {
    assert_eq!(err_code("f!(a: Int = \"x\"): Int = 1\n"), 518);
}

#[test]
fn unannotated_functions_are_checked_per_call_site() {
    let source = "id!(x) = x\na = id(5)\nb = id(\"s\")\n";
    assert_eq!(name_type(source, "a"), "Int");
    assert_eq!(name_type(source, "b"), "Str");
}

#[test]
fn function_dimension_arguments() {
    let source = "unit m\nunit s\nspeed!(d: Float[m], t: Float[s]): Float[m/s] = d / t\nv = speed(10.0 m, 2.0 s)\n";
    let rendered = name_type(source, "v");
    assert!(rendered.starts_with("Float["), "got {rendered}");

    let bad = "unit m\nunit s\nspeed!(d: Float[m], t: Float[s]): Float[m/s] = d / t\nv = speed(10.0 s, 2.0 s)\n";
    assert_eq!(err_code(bad), 513);
}

// --------------------------------------------------------------- variables

#[test]
fn reassignment_rules() {
    assert_eq!(name_type("x = 1\nx = 2\n", "x"), "Int");
    assert_eq!(err_code("x = 1\nx: Int = 2\n"), 604);
    assert_eq!(err_code("x = 1\nx = \"a\"\n"), 535);
    assert_eq!(err_code("x = 1\ny: Int\ny: Int\n"), 604);
}

#[test]
fn annotation_must_match_value() {
    assert_eq!(err_code("x: Str = 5\n"), 536);
    assert_eq!(err_code("unit m\nunit s\nx: Float[m] = 5.0 s\n"), 536);
}

#[test]
fn list_any_annotation_is_refined() {
    assert_eq!(name_type("xs: List[Any] = [1, 2]\n", "xs"), "List[Int]");
}

// ----------------------------------------------------------------- headers

#[test]
fn header_declarations_must_precede_statements() {
    assert_eq!(err_code("x = 1\nimport si\n"), 801);
    assert_eq!(err_code("x = 1\nunit m\n"), 20);
}

#[test]
fn redefinitions_are_rejected() {
    assert_eq!(err_code("unit m\nunit m\n"), 603);
    assert_eq!(err_code("dimension D\nunit D\n"), 603);
}

#[test]
fn stdlib_import_and_arithmetic() {
    let source = "from si import @m, @s, @km\nd = 2 km\nt = 100 s\nv = d / t\n";
    let rendered = name_type(source, "v");
    assert!(rendered.contains("Length"), "got {rendered}");
    assert!(rendered.contains("Time^-1"), "got {rendered}");
}

#[test]
fn star_import_brings_units() {
    let source = "from si import *\nx: Float[m] = 5.0 km\n";
    compile_source(source).unwrap();
}

#[test]
fn plain_name_import_hints_at_unit_prefix() {
    let err = match compile_source("from si import m\n") {
        Err(diagnostic) => diagnostic,
        Ok(_) => panic!("expected a diagnostic"),
    };
    assert_eq!(err.code, 804);
    assert!(err.help.unwrap().contains('@'));
}

// ---------------------------------------------------------------- emission

#[test]
fn emits_a_complete_program() {
    let source = "unit m\nunit km = 1000 m\n\
                  to_km!(d: Float[m]): Float[km] = d -> km\n\
                  x = 5 km\n\
                  echo(to_km(2500.0 m))\n";
    let compiled = compile_source(source).unwrap();
    assert!(compiled.code.contains("nbs_fn_to_km"));
    assert!(compiled.main.contains("nbs_echo"));
}
