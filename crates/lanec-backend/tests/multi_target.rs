use lanec_backend::{compile_and_output, BuildError, BuildRequest, Driver, OutputType};
use std::fs;
use std::path::{Path, PathBuf};

const SCALE: &str = r#"{
    "globals": [
        {"name": "counter", "type": {"kind": "atomic", "atomic": "int32"}, "init": 5},
        {"name": "lanes", "type": {"kind": "atomic", "atomic": "int32", "variability": "varying"}, "init": 1, "pos": {"file": "scale.lc", "line": 2, "column": 1}}
    ],
    "functions": [{
        "name": "scale",
        "type": {
            "return_type": {"kind": "atomic", "atomic": "void"},
            "params": [{"name": "p", "type": {"kind": "pointer", "pointee": {"kind": "atomic", "atomic": "float", "variability": "varying"}}}],
            "is_exported": true
        }
    }],
    "includes": ["common.lch"]
}"#;

fn workspace(source: &str) -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("scale.json");
    fs::write(&path, source).unwrap();
    (dir, path)
}

fn request(source: &Path, targets: &str, dir: &Path) -> BuildRequest {
    let mut request = BuildRequest::new(Some(source.to_path_buf()));
    request.targets = Some(targets.to_string());
    request.output_type = OutputType::BitcodeText;
    request.out_file = Some(dir.join("scale.ll"));
    request.header_file = Some(dir.join("scale.h"));
    request
}

fn files_in(dir: &Path) -> Vec<String> {
    let mut names = fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect::<Vec<_>>();
    names.sort();
    names
}

#[test]
fn writes_one_artifact_per_target_plus_the_dispatch_module() {
    let (dir, source) = workspace(SCALE);
    let driver = Driver::default();
    let outcome = driver.run(&request(&source, "avx2,sse2", dir.path())).unwrap();

    assert_eq!(outcome.targets, vec!["sse2-i32x4", "avx2-i32x8"]);
    assert_eq!(
        files_in(dir.path()),
        vec![
            "scale.h",
            "scale.json",
            "scale.ll",
            "scale_avx2.h",
            "scale_avx2.ll",
            "scale_sse2.h",
            "scale_sse2.ll",
        ]
    );

    let dispatch = fs::read_to_string(dir.path().join("scale.ll")).unwrap();
    assert!(dispatch.contains("define void @scale(i8* %p) {"));
    assert!(dispatch.contains("bitcast i8* %p to <8 x float>*"));
    assert!(dispatch.contains("bitcast i8* %p to <4 x float>*"));
    assert!(dispatch.contains("declare void @scale_avx2(<8 x float>*)"));
    assert!(dispatch.contains("call void @abort()"));
    let avx2_call = dispatch.find("call void @scale_avx2(").unwrap();
    let sse2_call = dispatch.find("call void @scale_sse2(").unwrap();
    assert!(avx2_call < sse2_call);

    let avx2 = fs::read_to_string(dir.path().join("scale_avx2.ll")).unwrap();
    assert!(avx2.contains("define void @scale_avx2(<8 x float>* %p)"));

    let plan = &outcome.dispatch_plans[0];
    assert_eq!(plan.name, "scale");
    assert_eq!(plan.opaque_params, vec![true]);
}

#[test]
fn initialized_globals_are_defined_once() {
    let (dir, source) = workspace(SCALE);
    Driver::default()
        .run(&request(&source, "sse2,avx2", dir.path()))
        .unwrap();

    let dispatch = fs::read_to_string(dir.path().join("scale.ll")).unwrap();
    assert!(dispatch.contains("@counter = global i32 5"));
    for isa in ["sse2", "avx2"] {
        let text = fs::read_to_string(dir.path().join(format!("scale_{}.ll", isa))).unwrap();
        assert!(text.contains("@counter = external global i32"), "{}", text);
        assert!(!text.contains("@counter = global"));
    }
}

#[test]
fn width_dependent_globals_only_warn() {
    let (dir, source) = workspace(SCALE);
    let driver = Driver::default();
    driver
        .run(&request(&source, "sse2,avx2", dir.path()))
        .unwrap();

    let mismatches = driver
        .diagnostics()
        .get_diagnostics()
        .into_iter()
        .filter(|diagnostic| diagnostic.message.contains("Mismatch in size/layout"))
        .collect::<Vec<_>>();
    assert_eq!(mismatches.len(), 1);
    assert!(mismatches[0].message.contains("\"lanes\""));
    assert_eq!(driver.diagnostics().error_count(), 0);
}

#[test]
fn duplicate_isas_are_rejected_before_writing() {
    let (dir, source) = workspace(SCALE);
    let result = Driver::default().run(&request(&source, "avx2,avx2", dir.path()));
    assert!(matches!(result, Err(BuildError::Config(_))));
    assert_eq!(files_in(dir.path()), vec!["scale.json"]);

    assert_eq!(
        compile_and_output(&request(&source, "avx2,avx2", dir.path())),
        1
    );
}

#[test]
fn empty_target_entries_are_rejected_before_writing() {
    let (dir, source) = workspace(SCALE);
    for targets in ["avx2,", " , "] {
        let result = Driver::default().run(&request(&source, targets, dir.path()));
        match result {
            Err(BuildError::Config(message)) => assert!(message.contains("Empty target name")),
            other => panic!("expected a configuration error, got {:?}", other.map(|o| o.artifacts)),
        }
    }
    assert_eq!(files_in(dir.path()), vec!["scale.json"]);
}

#[test]
fn extern_c_exports_are_compile_errors() {
    let clash = r#"{
        "functions": [{
            "name": "f",
            "type": {
                "return_type": {"kind": "atomic", "atomic": "void"},
                "is_exported": true,
                "is_extern_c": true
            }
        }]
    }"#;
    let (dir, source) = workspace(clash);
    let driver = Driver::default();
    let result = driver.run(&request(&source, "sse2,avx2", dir.path()));

    assert!(matches!(result, Err(BuildError::Compile { errors: 2 })));
    assert_eq!(files_in(dir.path()), vec!["scale.json"]);
}

#[test]
fn compile_errors_stop_before_dispatch_synthesis() {
    let broken = r#"{
        "functions": [{
            "name": "bad",
            "type": {
                "return_type": {"kind": "atomic", "atomic": "float", "variability": "varying"},
                "is_exported": true
            }
        }]
    }"#;
    let (dir, source) = workspace(broken);
    let driver = Driver::default();
    let result = driver.run(&request(&source, "sse2,avx2", dir.path()));

    // both passes run and report
    assert!(matches!(result, Err(BuildError::Compile { errors: 2 })));
    assert_eq!(files_in(dir.path()), vec!["scale.json"]);
}

#[test]
fn repeated_builds_produce_the_same_dispatch_module() {
    let (first_dir, source) = workspace(SCALE);
    let second_dir = tempfile::tempdir().unwrap();

    let first = Driver::default()
        .run(&request(&source, "sse2,avx2", first_dir.path()))
        .unwrap();
    let second = Driver::default()
        .run(&request(&source, "sse2,avx2", second_dir.path()))
        .unwrap();

    assert_eq!(first.dispatch_plans, second.dispatch_plans);
    assert_eq!(
        fs::read_to_string(first_dir.path().join("scale.ll")).unwrap(),
        fs::read_to_string(second_dir.path().join("scale.ll")).unwrap()
    );
}

#[test]
fn dispatch_header_declares_everything_once() {
    let (dir, source) = workspace(SCALE);
    Driver::default()
        .run(&request(&source, "sse2,avx1-i32x16,avx2", dir.path()))
        .unwrap();

    let header = fs::read_to_string(dir.path().join("scale.h")).unwrap();
    assert_eq!(header.matches("#pragma once").count(), 1);
    assert_eq!(header.matches("// Functions exported from lanec code").count(), 1);
    assert_eq!(header.matches("extern void scale(void *p);").count(), 1);
    assert_eq!(header.matches("} /* namespace */").count(), 1);

    let avx = fs::read_to_string(dir.path().join("scale_avx.h")).unwrap();
    assert!(avx.contains("extern void scale_avx(float (*p)[16]);"));
}

#[test]
fn single_target_builds_keep_plain_names() {
    let (dir, source) = workspace(SCALE);
    let mut request = request(&source, "avx2", dir.path());
    request.deps_file = Some(dir.path().join("scale.d"));
    request.flags.make_rule_deps = true;
    request.deps_target = Some("scale.o".into());

    let outcome = Driver::default().run(&request).unwrap();
    assert_eq!(outcome.targets, vec!["avx2-i32x8"]);
    assert!(outcome.dispatch_plans.is_empty());
    assert_eq!(
        files_in(dir.path()),
        vec!["scale.d", "scale.h", "scale.json", "scale.ll"]
    );

    let code = fs::read_to_string(dir.path().join("scale.ll")).unwrap();
    assert!(code.contains("define void @scale(<8 x float>* %p)"));
    assert!(code.contains("@counter = global i32 5"));

    let deps = fs::read_to_string(dir.path().join("scale.d")).unwrap();
    assert_eq!(
        deps,
        format!("scale.o: {} \\\n common.lch\n", source.display())
    );
}
