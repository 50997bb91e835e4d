use tngl_compiler::flags;
use tngl_compiler::{
    compile, compile_with, CompileError, Compiler, CompilerOptions, MemoryFragmentStore,
    TnglReader,
};

/// ------------------------------------------------------------
/// Helpers
/// ------------------------------------------------------------
fn le32(value: i32) -> [u8; 4] {
    value.to_le_bytes()
}

fn compile_ok(source: &str) -> Vec<u8> {
    compile(source)
        .unwrap_or_else(|e| panic!("{source:?} failed to compile: {e}"))
        .bytes
}

/// ------------------------------------------------------------
/// End-to-end
/// ------------------------------------------------------------
#[test]
fn event_catcher_program_compiles_byte_exact() {
    let source = "var x=5%; onEventStateSet<ID0>($go).setValue(x).setEventState($on);";
    let bytes = compile_ok(source);

    let mut expected = vec![flags::DECLARE_VARIABLE, 1, 0, flags::PERCENTAGE];
    expected.extend_from_slice(&le32(5_000_000));
    expected.extend_from_slice(&[
        flags::EVENT_CATCHER,
        flags::ID,
        0,
        flags::LABEL,
        b'g',
        b'o',
        0,
        0,
        0,
        flags::EVENT_SET_VALUE,
        flags::READ_ADDRESS,
        1,
        0,
        flags::EVENT_EMIT_LOCAL,
        flags::LABEL,
        b'o',
        b'n',
        0,
        0,
        0,
        flags::END_OF_SCOPE,
        flags::END_OF_TNGL_BYTES,
    ]);
    assert_eq!(bytes, expected);
}

#[test]
fn repeated_compiles_are_identical() {
    let source = "var x=5%; onEventStateSet<ID0>($go).setValue(x).setEventState($on);";
    let first = compile(source).unwrap();
    let second = compile(source).unwrap();
    assert_eq!(first, second);
    assert_eq!(first.fingerprint, second.fingerprint);
}

#[test]
fn bytecode_can_be_walked_with_the_reader() {
    let bytes = compile_ok("var speed = 50%; animRainbow(&speed);");
    let mut reader = TnglReader::new(&bytes);
    assert_eq!(reader.read_flag().unwrap(), flags::DECLARE_VARIABLE);
    let address = reader.read_value(2).unwrap();
    assert_eq!(reader.read_flag().unwrap(), flags::PERCENTAGE);
    assert_eq!(reader.read_signed(4).unwrap(), 50_000_000);
    assert_eq!(reader.read_flag().unwrap(), flags::ANIMATION_RAINBOW);
    assert_eq!(reader.read_flag().unwrap(), flags::READ_ADDRESS);
    assert_eq!(reader.read_value(2).unwrap(), address);
    assert_eq!(reader.read_flag().unwrap(), flags::END_OF_SCOPE);
    assert_eq!(reader.read_flag().unwrap(), flags::END_OF_TNGL_BYTES);
    assert_eq!(reader.available(), 0);
}

/// ------------------------------------------------------------
/// Scoping
/// ------------------------------------------------------------
#[test]
fn inner_declaration_shadows_outer_until_block_closes() {
    let bytes = compile_ok("var a=1; { var a=2; &a; } &a;");
    let reads: Vec<u16> = bytes
        .windows(3)
        .filter(|w| w[0] == flags::READ_ADDRESS)
        .map(|w| u16::from_le_bytes([w[1], w[2]]))
        .collect();
    assert_eq!(reads, vec![2, 1]);
}

#[test]
fn symbol_table_is_visible_between_token_batches() {
    let mut compiler = Compiler::new(1024);
    compiler
        .compile_tokens(&tngl_compiler::tokenize("var a = 1; {"))
        .unwrap();
    compiler
        .compile_tokens(&tngl_compiler::tokenize("var a = 2;"))
        .unwrap();
    let visible: Vec<u16> = compiler.visible_variables().iter().map(|s| s.address).collect();
    assert_eq!(visible, vec![1, 2]);
    compiler
        .compile_tokens(&tngl_compiler::tokenize("}"))
        .unwrap();
    assert_eq!(compiler.visible_variables().len(), 1);
}

/// ------------------------------------------------------------
/// Boundary constants
/// ------------------------------------------------------------
#[test]
fn boundary_percentages_are_single_bytes() {
    for (source, flag) in [
        ("0%", flags::PERCENTAGE_ZERO),
        ("100%", flags::PERCENTAGE_MAX),
        ("-100%", flags::PERCENTAGE_MIN),
    ] {
        assert_eq!(
            compile_ok(source),
            vec![flag, flags::END_OF_SCOPE, flags::END_OF_TNGL_BYTES],
            "{source}"
        );
    }
    let bytes = compile_ok("50%");
    assert_eq!(bytes.len(), 1 + 4 + 2);
    assert_eq!(bytes[0], flags::PERCENTAGE);
}

#[test]
fn timestamps_clamp_to_infinity_constants() {
    assert_eq!(compile_ok("23h 59m 61s")[0], flags::TIMESTAMP_MAX);
    assert_eq!(compile_ok("-24h -1ms")[0], flags::TIMESTAMP_MIN);
    assert_eq!(compile_ok("0ms")[0], flags::TIMESTAMP_ZERO);
    assert_eq!(compile_ok("1h -1h")[0], flags::TIMESTAMP_ZERO);
}

/// ------------------------------------------------------------
/// Errors discard everything
/// ------------------------------------------------------------
#[test]
fn errors_name_the_offending_token() {
    let err = compile("animFill(#ff0000, 1s);\nsparkle(1s);").unwrap_err();
    assert_eq!(
        err,
        CompileError::UnknownWord {
            word: "sparkle".into(),
            offset: 23
        }
    );
}

#[test]
fn const_and_let_are_rejected() {
    assert!(matches!(
        compile("const speed = 5;"),
        Err(CompileError::UnsupportedDeclaration { .. })
    ));
    assert!(matches!(
        compile("let speed = 5;"),
        Err(CompileError::UnsupportedDeclaration { .. })
    ));
}

/// ------------------------------------------------------------
/// Preprocessor integration
/// ------------------------------------------------------------
#[test]
fn defines_and_conditionals_feed_the_compiler() {
    let source = "#define LEVEL 100%\n#ifdef NIGHT\nmodifyBrightness(10%);\n#else\nmodifyBrightness(LEVEL);\n#endif";
    assert_eq!(
        compile_ok(source),
        vec![
            flags::MODIFIER_BRIGHTNESS,
            flags::PERCENTAGE_MAX,
            flags::END_OF_SCOPE,
            flags::END_OF_TNGL_BYTES
        ]
    );

    let options = CompilerOptions {
        defines: vec![("NIGHT".into(), String::new())],
        ..CompilerOptions::default()
    };
    let night = compile_with(source, &options, None).unwrap();
    assert_eq!(night.bytes[0], flags::MODIFIER_BRIGHTNESS);
    assert_eq!(night.bytes[1], flags::PERCENTAGE);
}

#[test]
fn fetched_fragments_are_compiled() {
    let store = MemoryFragmentStore::new().with("base", "animFill(#ffffff, 1s);");
    let program = compile_with(
        "FETCH_TNGL(\"base\")",
        &CompilerOptions::default(),
        Some(&store),
    )
    .unwrap();
    assert_eq!(program.bytes[0], flags::ANIMATION_FILL);
    assert_eq!(program.bytes[1], flags::COLOR_WHITE);
}

#[test]
fn scenes_compile_into_scene_events() {
    let source = r#"SCENE(`[{"id": 2, "label": "on", "type": "number", "value": 1, "timestamp": 0}]`)"#;
    let bytes = compile_ok(source);
    let mut expected = vec![
        flags::SCENE_EVENTS,
        flags::ID,
        2,
        flags::EVENT_AT,
        flags::TIMESTAMP_ZERO,
        flags::EVENT_SET_VALUE,
        flags::NUMBER,
    ];
    expected.extend_from_slice(&le32(1));
    expected.extend_from_slice(&[flags::EVENT_EMIT_LOCAL, flags::LABEL, b'o', b'n', 0, 0, 0]);
    expected.extend_from_slice(&[flags::END_OF_SCOPE, flags::END_OF_TNGL_BYTES]);
    assert_eq!(bytes, expected);
}

#[test]
fn script_blocks_are_minified_before_embedding() {
    let source = "BERRY(`# @minify-locals\nvar level = ID3\nlevel = level + 1\n`)";
    let bytes = compile_ok(source);
    let script = b"var _a=3 _a=_a+1";
    assert_eq!(bytes[0], flags::BERRY_SCRIPT);
    assert_eq!(
        u16::from_le_bytes([bytes[1], bytes[2]]) as usize,
        script.len()
    );
    assert_eq!(&bytes[3..3 + script.len()], script);
}
