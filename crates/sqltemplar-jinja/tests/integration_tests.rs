//! Integration tests for the Jinja templater

use pretty_assertions::assert_eq;
use sqltemplar_core::{Config, TemplatedFile, TemplatedSliceKind};
use sqltemplar_jinja::{JinjaTemplater, ProcessResult, TemplaterError};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn process(source: &str, config: &Config) -> ProcessResult {
    JinjaTemplater::new().process(source, "models/test.sql", config)
}

fn rendered(result: &ProcessResult) -> Option<&str> {
    result.templated_file.as_ref().and_then(TemplatedFile::templated_str)
}

fn macro_config(dir: &Path, extra: &str) -> Config {
    Config::from_toml(&format!(
        "[templater.jinja]\nload_macros_from_path = '{}'\n{extra}",
        dir.display()
    ))
    .unwrap()
}

fn assert_tiling(file: &TemplatedFile) {
    let mut pos = 0;
    for slice in &file.raw_sliced {
        assert_eq!(slice.source_idx, pos);
        pos += slice.raw.len();
    }
    assert_eq!(pos, file.source_str.len());

    let mut pos = 0;
    for slice in &file.sliced_file {
        assert_eq!(slice.templated_slice.start, pos);
        pos = slice.templated_slice.end;
    }
    assert_eq!(pos, file.templated_str().unwrap().len());
}

#[test]
fn slices_tile_source_and_output() {
    let source = "\
{#- header -#}
SELECT
    {% for col in ['a', 'b', 'c'] -%}
    {{ col }}{% if not loop.last %},{% endif %}
    {% endfor -%}
FROM {{ schema }}.orders
{% if false %}WHERE 1 = 0{% endif %}
";
    let config = Config::from_toml("[templater.jinja.context]\nschema = \"raw\"\n").unwrap();
    let result = process(source, &config);

    assert!(result.errors.is_empty(), "{:?}", result.errors);
    let file = result.templated_file.unwrap();
    assert_tiling(&file);
    assert!(file.templated_str().unwrap().contains("FROM raw.orders"));
}

#[test]
fn inline_macros_take_precedence_over_path_macros() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("greet.sql"), "{% macro greet() %}from path{% endmacro %}").unwrap();
    let config = macro_config(
        dir.path(),
        "[templater.jinja.macros]\ngreeting = \"{% macro greet() %}inline{% endmacro %}\"\n",
    );

    let result = process("SELECT '{{ greet() }}'", &config);
    assert_eq!(rendered(&result), Some("SELECT 'inline'"));
}

#[test]
fn undefined_variable_in_record_mode() {
    let result = process("SELECT {{ foo }}", &Config::default());

    assert_eq!(rendered(&result), Some("SELECT "));
    assert_eq!(
        result.errors,
        vec![TemplaterError::UndefinedVariable {
            name: "foo".to_string(),
            line: 1,
            column: 11,
        }]
    );
    let diagnostics = result.diagnostics("models/test.sql");
    assert_eq!(diagnostics[0].message, "Undefined jinja template variable: 'foo'");
}

#[test]
fn undefined_variable_in_ignore_mode() {
    let config = Config::from_toml("ignore = [\"templating\"]\n").unwrap();
    let result = process("SELECT {{ foo }}", &config);

    assert_eq!(rendered(&result), Some("SELECT foo"));
    assert!(result.errors.is_empty());
}

#[test]
fn table_suffix_heuristic() {
    let result = process("SELECT * FROM {{ my_tbl }}", &Config::default());
    assert_eq!(rendered(&result), Some("SELECT * FROM some_tbl"));
    assert!(result.errors.is_empty());
}

#[test]
fn macros_can_call_macros_from_sibling_files() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("a.sql"), "{% macro a() %}A{{ b() }}{% endmacro %}").unwrap();
    fs::write(dir.path().join("b.sql"), "{% macro b() %}B{% endmacro %}").unwrap();
    let config = macro_config(dir.path(), "");

    let result = process("{{ a() }}", &config);
    assert_eq!(rendered(&result), Some("AB"));
}

#[test]
fn three_level_macro_chains_are_not_resolved() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("alpha.sql"), "{% macro alpha() %}alpha{{ beta() }}{% endmacro %}").unwrap();
    fs::write(dir.path().join("beta.sql"), "{% macro beta() %}beta{{ gamma() }}{% endmacro %}").unwrap();
    fs::write(dir.path().join("gamma.sql"), "{% macro gamma() %}gamma{% endmacro %}").unwrap();
    let config = macro_config(dir.path(), "");

    // Two levels resolve
    let result = process("{{ beta() }}", &config);
    assert_eq!(rendered(&result), Some("betagamma"));

    // The third level is missing from what alpha sees
    let result = process("{{ alpha() }}", &config);
    assert_ne!(rendered(&result), Some("alphabetagamma"));
}

#[test]
fn syntax_error_degrades_to_source_only_file() {
    let source = "SELECT a\nFROM b\nWHERE {% endif %}\n";
    let result = process(source, &Config::default());

    let file = result.templated_file.as_ref().unwrap();
    assert_eq!(file.templated_str(), None);
    assert_eq!(file.source_str, source);
    assert_eq!(result.errors.len(), 1);
    match &result.errors[0] {
        TemplaterError::TemplateSyntax { line, .. } => assert_eq!(*line, 3),
        other => panic!("expected a syntax error, got {other:?}"),
    }
}

#[test]
fn loop_iterations_share_a_raw_slice() {
    let result = process("{% for i in [1, 2, 3] %}{{ i }}{% endfor %}", &Config::default());
    let file = result.templated_file.unwrap();
    assert_eq!(file.templated_str(), Some("123"));

    let body: Vec<_> = file
        .sliced_file
        .iter()
        .filter(|s| !s.is_zero_length())
        .collect();
    assert_eq!(body.len(), 3);
    assert!(body.iter().all(|s| s.raw_indices == body[0].raw_indices));
    assert!(body.windows(2).all(|w| w[0].templated_slice.end <= w[1].templated_slice.start));
    assert_eq!(body[1].slice_type, TemplatedSliceKind::Repeated);
}

#[test]
fn library_namespaces_are_available() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("settings.toml"), "schema = \"analytics\"\n").unwrap();
    fs::write(dir.path().join("sql.sql"), "{% macro quote(x) %}\"{{ x }}\"{% endmacro %}").unwrap();
    let config = Config::from_toml(&format!(
        "[templater.jinja]\nlibrary_path = '{}'\n",
        dir.path().display()
    ))
    .unwrap();

    let result = process("SELECT {{ sql.quote('id') }} FROM {{ settings.schema }}.t", &config);
    assert!(result.errors.is_empty(), "{:?}", result.errors);
    assert_eq!(rendered(&result), Some("SELECT \"id\" FROM analytics.t"));
}

#[test]
fn missing_include_renders_as_stem_when_ignoring() {
    let config = Config::from_toml("ignore = [\"templating\"]\n").unwrap();
    let result = process("SELECT * FROM {% include 'tables/orders.sql' %}", &config);
    assert_eq!(rendered(&result), Some("SELECT * FROM orders"));
}

#[test]
fn templated_slice_maps_back_to_source() {
    let config = Config::from_toml("[templater.jinja.context]\ncol = \"amount\"\n").unwrap();
    let result = process("SELECT {{ col }} FROM t", &config);
    let file = result.templated_file.unwrap();

    let from = file.templated_str().unwrap().find("FROM").unwrap();
    let source = file.templated_slice_to_source_slice(from..from + 4);
    assert_eq!(&file.source_str[source], "FROM");
}

#[test]
fn literal_loop_body_unrolls_into_repeated_slices() {
    let source = "{% for i in range(3) %}\nSELECT 1\n{% endfor %}";
    let result = process(source, &Config::default());
    let file = result.templated_file.unwrap();
    assert_eq!(file.templated_str(), Some("\nSELECT 1\n".repeat(3).as_str()));
    assert_tiling(&file);

    let body: Vec<_> = file.sliced_file.iter().filter(|s| s.raw_indices == vec![1]).collect();
    let kinds: Vec<_> = body.iter().map(|s| s.slice_type).collect();
    let spans: Vec<_> = body.iter().map(|s| s.templated_slice.clone()).collect();
    assert_eq!(
        kinds,
        vec![
            TemplatedSliceKind::Literal,
            TemplatedSliceKind::Repeated,
            TemplatedSliceKind::Repeated,
        ]
    );
    assert_eq!(spans, vec![0..10, 10..20, 20..30]);
}

#[test]
fn ignored_names_count_as_missing_for_default_and_defined() {
    let config = Config::from_toml("ignore = [\"templating\"]\n").unwrap();

    let result = process("SELECT {{ foo | default('dflt') }}", &config);
    assert_eq!(rendered(&result), Some("SELECT dflt"));

    let result = process("{% if foo is defined %}yes{% else %}no{% endif %}", &config);
    assert_eq!(rendered(&result), Some("no"));
}

#[test]
fn ignored_names_in_operators() {
    let config = Config::from_toml("ignore = [\"templating\"]\n").unwrap();

    // Concatenation goes through the rendered name
    let result = process("SELECT {{ foo ~ '_x' }}", &config);
    assert_eq!(rendered(&result), Some("SELECT foo_x"));

    // Comparisons evaluate against the placeholder object
    let result = process("{% if foo == 'bar' %}yes{% else %}no{% endif %}", &config);
    assert_eq!(rendered(&result), Some("no"));

    // Arithmetic is not supported on placeholders
    let result = process("SELECT {{ foo + '_x' }}", &config);
    assert!(result.templated_file.is_none());
    assert!(matches!(result.errors[..], [TemplaterError::Render { .. }]));
}

#[test]
fn macro_file_with_undefined_top_level_name_is_skipped() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("m.sql"), "{% set x = foo.bar %}{% macro a() %}A{% endmacro %}").unwrap();
    let config = macro_config(dir.path(), "");

    let result = process("SELECT {{ a() }}", &config);
    assert_eq!(rendered(&result), Some("SELECT "));
    assert!(result.errors.iter().any(|e| matches!(
        e,
        TemplaterError::UndefinedVariable { name, line: 1, .. } if name == "a"
    )));
}
