use arch_guardian::config::ScannerConfig;
use arch_guardian::parser::ParserRegistry;
use arch_guardian::rules::{CircularDependencyRule, LayerMap};
use arch_guardian::scanner::PathFilter;
use arch_guardian::{ChangeKind, GuardianConfig, ProjectScanner, RuleEngine};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

/// `modules` packages of `files` files each; every file imports its successor,
/// and the last file of each package closes a cycle back to the first
fn synthetic_project(modules: usize, files: usize) -> TempDir {
    let dir = TempDir::new().expect("temp dir");
    for m in 0..modules {
        let package = dir.path().join(format!("src/m{m}"));
        fs::create_dir_all(&package).expect("package dir");
        for f in 0..files {
            let next = (f + 1) % files;
            let content = format!(
                "import {{ v{next} }} from './f{next}';\nimport {{ shared }} from '../m{}/f0';\nexport const v{f} = v{next} + shared;\n",
                (m + 1) % modules
            );
            fs::write(package.join(format!("f{f}.ts")), content).expect("source file");
        }
    }
    dir
}

fn scanner(root: &Path) -> ProjectScanner {
    ProjectScanner::new(
        root,
        PathFilter::default(),
        ParserRegistry::with_defaults(),
        LayerMap::default(),
        ScannerConfig::default(),
    )
}

fn bench_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("scan");
    group.sample_size(20);
    for modules in [10, 50] {
        let project = synthetic_project(modules, 20);
        group.bench_with_input(BenchmarkId::from_parameter(modules * 20), &project, |b, project| {
            b.iter(|| {
                let mut scanner = scanner(project.path());
                black_box(scanner.scan().expect("scan").edge_count())
            })
        });
    }
    group.finish();
}

fn bench_cycles(c: &mut Criterion) {
    let project = synthetic_project(50, 20);
    let mut scanner = scanner(project.path());
    scanner.scan().expect("scan");
    let rule = CircularDependencyRule::new();

    c.bench_function("find_cycles/1000", |b| b.iter(|| black_box(rule.find_cycles(scanner.graph()).len())));
}

fn bench_incremental(c: &mut Criterion) {
    let project = synthetic_project(50, 20);
    let mut scanner = scanner(project.path());
    scanner.scan().expect("scan");
    let engine = RuleEngine::with_builtin_rules(Arc::new(GuardianConfig::default()));
    let edited = project.path().join("src/m7/f3.ts");

    c.bench_function("update_and_validate_file", |b| {
        b.iter(|| {
            scanner.update_file(&edited, ChangeKind::Change).expect("update");
            black_box(engine.validate_file("src/m7/f3.ts", scanner.graph(), scanner.file_contents()).len())
        })
    });
    c.bench_function("validate/1000", |b| {
        b.iter(|| black_box(engine.validate(scanner.graph(), scanner.file_contents()).len()))
    });
}

criterion_group!(benches, bench_scan, bench_cycles, bench_incremental);
criterion_main!(benches);
