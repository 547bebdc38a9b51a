//! Built-in SUSFS plan against fixture kernel trees
//!
//! `tests/fixtures/gki` follows the current GKI layout and carries the
//! misplaced fragments older reject fixes left behind. `tests/fixtures/legacy`
//! uses the older APIs that only the fallback tiers match.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use susfs_patcher::kernel::susfs::{susfs_checks, susfs_plan, NAMEI_C, TASK_MMU_C};
use susfs_patcher::kernel::validator::verify;
use susfs_patcher::{OperationOutcome, PatchRunner};
use tempfile::TempDir;

fn fixture_dir(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name)
}

fn copy_tree(from: &Path, to: &Path) {
    fs::create_dir_all(to).expect("Failed to create directory");
    for entry in fs::read_dir(from).expect("Failed to read fixture directory") {
        let entry = entry.expect("Failed to read entry");
        let target = to.join(entry.file_name());
        if entry.path().is_dir() {
            copy_tree(&entry.path(), &target);
        } else {
            fs::copy(entry.path(), &target).expect("Failed to copy fixture");
        }
    }
}

/// Fresh copy of a fixture tree in a temp directory.
fn fixture_tree(name: &str) -> TempDir {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    copy_tree(&fixture_dir(name), temp_dir.path());
    temp_dir
}

/// Every regular file under `root`, keyed by relative path.
fn snapshot(root: &Path) -> BTreeMap<PathBuf, String> {
    fn walk(root: &Path, dir: &Path, out: &mut BTreeMap<PathBuf, String>) {
        for entry in fs::read_dir(dir).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                walk(root, &path, out);
            } else {
                let rel = path.strip_prefix(root).unwrap().to_path_buf();
                out.insert(rel, fs::read_to_string(&path).unwrap());
            }
        }
    }
    let mut out = BTreeMap::new();
    walk(root, root, &mut out);
    out
}

#[test]
fn test_gki_tree_applies_every_operation_at_tier_zero() {
    let tree = fixture_tree("gki");
    let plan = susfs_plan();

    let report = PatchRunner::new(tree.path()).apply_plan(&plan).unwrap();
    for result in &report.results {
        assert_eq!(result.outcome, OperationOutcome::Applied, "{}", result);
        assert_eq!(result.matched_candidate, Some(0), "{}", result);
    }
    assert!(report.success());
    assert_eq!(report.written.len(), 6);

    let verification = verify(tree.path(), &susfs_checks());
    assert_eq!(verification.failed(), 0, "{}", verification);
    assert_eq!(verification.warned(), 0, "{}", verification);
}

#[test]
fn test_gki_tree_repairs_misplaced_fragments() {
    let tree = fixture_tree("gki");
    PatchRunner::new(tree.path()).apply_plan(&susfs_plan()).unwrap();

    let namei = fs::read_to_string(tree.path().join(NAMEI_C)).unwrap();
    assert!(!namei.contains("is_nd_flags_lookup_last"));
    assert!(!namei.contains("ND_STATE_LAST_SDCARD_SUS_PATH"));
    assert!(!namei.contains("i_state & BIT_OPEN_REDIRECT"));
    assert!(namei.contains("return filp->f_inode->i_mapping->flags & BIT_OPEN_REDIRECT;"));
    assert!(namei.contains("\tint error;\n\n\terror = may_mknod(mode);"));

    // Include lands after uaccess.h; extern lands right before do_filp_open
    assert!(namei.contains(
        "#include <linux/uaccess.h>\n#if defined(CONFIG_KSU_SUSFS_SUS_PATH) || defined(CONFIG_KSU_SUSFS_OPEN_REDIRECT)\n#include <linux/susfs_def.h>\n#endif\n"
    ));
    assert!(namei.contains(
        "#endif\n\nstruct file *do_filp_open(int dfd, struct filename *pathname,"
    ));
    // do_file_open_root is left alone
    assert_eq!(namei.matches("susfs_get_redirected_path(filp->f_inode->i_ino)").count(), 1);
}

#[test]
fn test_gki_tree_second_run_is_a_no_op() {
    let tree = fixture_tree("gki");
    let plan = susfs_plan();

    PatchRunner::new(tree.path()).apply_plan(&plan).unwrap();
    let after_first = snapshot(tree.path());

    let rerun = PatchRunner::new(tree.path()).apply_plan(&plan).unwrap();
    for result in &rerun.results {
        assert_eq!(result.outcome, OperationOutcome::SkippedIdempotent, "{}", result);
    }
    assert!(rerun.written.is_empty());
    assert_eq!(snapshot(tree.path()), after_first);
}

#[test]
fn test_legacy_tree_uses_fallback_tiers() {
    let tree = fixture_tree("legacy");
    let report = PatchRunner::new(tree.path()).apply_plan(&susfs_plan()).unwrap();

    let expected = [
        ("mount_backup_field", Some(1)),
        ("proc_namespace_decls", Some(0)),
        ("show_mountinfo_filter", Some(1)),
        ("cmdline_decl", Some(0)),
        ("cmdline_hook", Some(1)),
        ("namei_include", Some(1)),
        ("namei_redirect_decl", Some(0)),
        ("namei_fake_pathname", Some(0)),
        ("namei_open_redirect", Some(1)),
        ("kallsyms_hide_symbols", Some(1)),
        ("pagemap_sus_map_guard", Some(1)),
    ];
    for (id, tier) in expected {
        let result = report.get(id).unwrap();
        assert_eq!(result.outcome, OperationOutcome::Applied, "{}", result);
        assert_eq!(result.matched_candidate, tier, "{}", result);
    }
    for id in [
        "namei_redirect_flag_fix",
        "namei_drop_misplaced_lookup_slow",
        "namei_drop_misplaced_sdcard_check",
    ] {
        assert_eq!(report.get(id).unwrap().outcome, OperationOutcome::SkippedIdempotent);
    }
    assert!(report.success());

    let verification = verify(tree.path(), &susfs_checks());
    assert!(verification.success(), "{}", verification);
}

#[test]
fn test_legacy_tree_content_shapes() {
    let tree = fixture_tree("legacy");
    PatchRunner::new(tree.path()).apply_plan(&susfs_plan()).unwrap();

    let mount = fs::read_to_string(tree.path().join("include/linux/mount.h")).unwrap();
    assert!(mount.contains(
        "\tint mnt_flags;\n#ifdef CONFIG_KSU_SUSFS\n\tu64 susfs_mnt_id_backup;\n#endif\n} __randomize_layout;"
    ));
    assert!(!mount.contains("ANDROID_KABI_USE"));
    // The second struct keeps its tail
    assert!(mount.contains("\tstruct hlist_head list;\n} __randomize_layout;"));

    let namei = fs::read_to_string(tree.path().join(NAMEI_C)).unwrap();
    assert!(namei.contains("#include <linux/susfs_def.h>\n#endif\n#include \"mount.h\"\n"));

    let task_mmu = fs::read_to_string(tree.path().join(TASK_MMU_C)).unwrap();
    assert!(task_mmu.contains(
        "\t\tup_read(&mm->mmap_sem);\n#ifdef CONFIG_KSU_SUSFS_SUS_MAP\n\t\tvma = find_vma(mm, start_vaddr);\n"
    ));
    assert!(task_mmu.contains("#endif\n\t\tstart_vaddr = end;\n\n\t\tlen = min("));
    // clear_refs_walk has the same unlock pair and stays untouched
    assert_eq!(task_mmu.matches("BIT_SUS_MAPS").count(), 1);
}

#[test]
fn test_pagemap_regex_tier_keeps_indentation() {
    let tree = TempDir::new().unwrap();
    let path = tree.path().join(TASK_MMU_C);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(
        &path,
        "static ssize_t pagemap_read(struct file *file)\n{\n\twhile (1) {\n\tret = walk(mm);\n\tmmap_read_unlock(mm);\n\tstart_vaddr = end;\n\t}\n\treturn ret;\n}\n",
    )
    .unwrap();

    let plan: Vec<_> = susfs_plan()
        .into_iter()
        .filter(|op| op.id == "pagemap_sus_map_guard")
        .collect();
    let report = PatchRunner::new(tree.path()).apply_plan(&plan).unwrap();
    assert_eq!(report.results[0].matched_candidate, Some(2));

    let patched = fs::read_to_string(&path).unwrap();
    assert!(patched.contains(
        "\tmmap_read_unlock(mm);\n#ifdef CONFIG_KSU_SUSFS_SUS_MAP\n\tvma = find_vma(mm, start_vaddr);\n\tif (vma && vma->vm_file) {\n"
    ));
    assert!(patched.contains("\t\tpm.show_pfn = false;\n"));
}

#[test]
fn test_missing_target_file_fails_run_and_keeps_going() {
    let tree = fixture_tree("gki");
    fs::remove_file(tree.path().join("kernel/kallsyms.c")).unwrap();

    let report = PatchRunner::new(tree.path()).apply_plan(&susfs_plan()).unwrap();
    let kallsyms = report.get("kallsyms_hide_symbols").unwrap();
    assert_eq!(kallsyms.outcome, OperationOutcome::FailedMissingTarget);
    assert_eq!(report.get("pagemap_sus_map_guard").unwrap().outcome, OperationOutcome::Applied);
    assert!(!report.success());
    assert!(report.to_string().contains("[ERR]  kernel/kallsyms.c"));
}
