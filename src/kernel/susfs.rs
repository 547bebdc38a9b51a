//! Built-in SUSFS integration plan and checklist.
//!
//! The plan patches six kernel files. Where upstream trees differ (KABI
//! reserve slots, `seq_puts` vs `seq_printf`, `mmap_read_unlock` vs
//! `up_read`), each variant is a separate anchor tier of the same operation
//! and the content builders read the matched text to pick the right shape.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::kernel::anchor::AnchorCandidate;
use crate::kernel::guard::Signature;
use crate::kernel::patcher::templates::{
    get_kallsyms_hide_block, get_mount_field, get_namei_include, get_sus_map_guard,
    BIT_OPEN_REDIRECT_CORRECT, BIT_OPEN_REDIRECT_WRONG, CMDLINE_DECL, CMDLINE_HOOK,
    MISPLACED_LOOKUP_SLOW, MISPLACED_SDCARD_SUS_PATH, NAMEI_FAKE_PATHNAME,
    NAMEI_OPEN_REDIRECT, NAMEI_REDIRECT_DECL, PROC_NAMESPACE_DECLS, SHOW_MOUNTINFO_FILTER,
};
use crate::kernel::patcher::PatchOperation;
use crate::kernel::validator::VerificationCheck;
use crate::models::InsertMode;

pub const MOUNT_H: &str = "include/linux/mount.h";
pub const PROC_NAMESPACE_C: &str = "fs/proc_namespace.c";
pub const CMDLINE_C: &str = "fs/proc/cmdline.c";
pub const NAMEI_C: &str = "fs/namei.c";
pub const KALLSYMS_C: &str = "kernel/kallsyms.c";
pub const TASK_MMU_C: &str = "fs/proc/task_mmu.c";

const SHOW_MOUNTINFO: &str = "static int show_mountinfo(";
const CMDLINE_PROC_SHOW: &str = "static int cmdline_proc_show(";
const DO_FILP_OPEN: &str = "struct file *do_filp_open(";
const DO_MKNODAT: &str = "do_mknodat(int dfd";
const VFS_UNLINK2: &str = "int vfs_unlink2(";
const S_SHOW: &str = "static int s_show(";
const PAGEMAP_READ: &str = "static ssize_t pagemap_read(";

// Post-conditions shared by operation signatures and the checklist
const KSU_DOMAIN_EXTERN: &str = "extern bool susfs_is_current_ksu_domain(void);";
const HIDE_SUS_MNTS_EXTERN: &str = "extern bool susfs_hide_sus_mnts_for_non_su_procs;";
const CMDLINE_EXTERN: &str = "extern int susfs_spoof_cmdline_or_bootconfig(";
const REDIRECT_EXTERN: &str = "extern struct filename *susfs_get_redirected_path(unsigned long ino);";
const FAKE_PATHNAME_LOCAL: &str = "\tstruct filename *fake_pathname;";
const PAGEMAP_FIND_VMA: &str = "vma = find_vma(mm, start_vaddr);";

static MOUNTINFO_SEQ_PRINTF: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^(?P<indent>[ \t]+)seq_printf\(m, ").expect("valid mountinfo regex")
});

static KALLSYMS_ELSE_TAIL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"[ \t]*\}\s*else\s*\n\s*seq_printf\(m, "%px %c %s\\n", value,\s*iter->type, iter->name\);\s*return 0;\n\}"#,
    )
    .expect("valid kallsyms regex")
});

static PAGEMAP_UNLOCK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?P<indent>[ \t]*)(?:mmap_read_unlock\(mm\)|up_read\(&mm->mmap_sem\));\n[ \t]*start_vaddr = end;",
    )
    .expect("valid pagemap regex")
});

/// The SUSFS plan, in application order.
pub fn susfs_plan() -> Vec<PatchOperation> {
    let mut plan = Vec::with_capacity(14);

    // include/linux/mount.h
    plan.push(
        PatchOperation::new(
            "mount_backup_field",
            "susfs_mnt_id_backup field in struct vfsmount",
            MOUNT_H,
            Signature::contains("u64 susfs_mnt_id_backup"),
            InsertMode::ReplaceSpan,
            get_mount_field,
        )
        .anchor(AnchorCandidate::literal("\tANDROID_KABI_RESERVE(4);\n} __randomize_layout;"))
        .anchor(AnchorCandidate::literal("} __randomize_layout;").after("struct vfsmount {")),
    );

    // fs/proc_namespace.c
    plan.push(
        PatchOperation::new(
            "proc_namespace_decls",
            "susfs_def.h include and sus-mount externs",
            PROC_NAMESPACE_C,
            Signature::AllOf(vec![
                Signature::contains(HIDE_SUS_MNTS_EXTERN),
                Signature::contains(KSU_DOMAIN_EXTERN),
            ]),
            InsertMode::InsertAfter,
            |_| PROC_NAMESPACE_DECLS.to_string(),
        )
        .anchor(AnchorCandidate::literal("#include \"internal.h\"\n")),
    );
    plan.push(
        PatchOperation::new(
            "show_mountinfo_filter",
            "sus-mount filter in show_mountinfo()",
            PROC_NAMESPACE_C,
            Signature::within(
                SHOW_MOUNTINFO,
                Signature::contains("susfs_hide_sus_mnts_for_non_su_procs &&"),
            ),
            InsertMode::InsertBefore,
            |_| SHOW_MOUNTINFO_FILTER.to_string(),
        )
        .anchor(AnchorCandidate::literal("\tseq_printf(m, \"%i %i %u:%u \",").within(SHOW_MOUNTINFO))
        .anchor(AnchorCandidate::from_regex(MOUNTINFO_SEQ_PRINTF.clone()).after(SHOW_MOUNTINFO)),
    );

    // fs/proc/cmdline.c
    plan.push(
        PatchOperation::new(
            "cmdline_decl",
            "susfs_spoof_cmdline_or_bootconfig extern",
            CMDLINE_C,
            Signature::contains(CMDLINE_EXTERN),
            InsertMode::InsertAfter,
            |_| CMDLINE_DECL.to_string(),
        )
        .anchor(AnchorCandidate::literal("#include <linux/seq_file.h>\n")),
    );
    plan.push(
        PatchOperation::new(
            "cmdline_hook",
            "cmdline spoof hook in cmdline_proc_show()",
            CMDLINE_C,
            Signature::contains("if (!susfs_spoof_cmdline_or_bootconfig(m))"),
            InsertMode::InsertBefore,
            |_| CMDLINE_HOOK.to_string(),
        )
        .anchor(AnchorCandidate::literal("\tseq_puts(m, saved_command_line);\n").within(CMDLINE_PROC_SHOW))
        .anchor(
            AnchorCandidate::literal("\tseq_printf(m, \"%s\\n\", saved_command_line);\n")
                .within(CMDLINE_PROC_SHOW),
        ),
    );

    // fs/namei.c
    plan.push(
        PatchOperation::new(
            "namei_include",
            "susfs_def.h include",
            NAMEI_C,
            Signature::contains("#include <linux/susfs_def.h>"),
            InsertMode::ReplaceSpan,
            get_namei_include,
        )
        .anchor(AnchorCandidate::literal("#include <linux/uaccess.h>\n"))
        .anchor(AnchorCandidate::literal("#include \"mount.h\"\n")),
    );
    plan.push(
        PatchOperation::new(
            "namei_redirect_flag_fix",
            "BIT_OPEN_REDIRECT tested on i_mapping->flags",
            NAMEI_C,
            Signature::absent(Signature::contains(BIT_OPEN_REDIRECT_WRONG)),
            InsertMode::ReplaceSpan,
            |_| BIT_OPEN_REDIRECT_CORRECT.to_string(),
        )
        .anchor(AnchorCandidate::literal(BIT_OPEN_REDIRECT_WRONG))
        .optional(),
    );
    plan.push(
        PatchOperation::new(
            "namei_drop_misplaced_lookup_slow",
            "misplaced lookup_slow() fragment removed from do_mknodat()",
            NAMEI_C,
            Signature::absent(Signature::within(
                DO_MKNODAT,
                Signature::contains(MISPLACED_LOOKUP_SLOW),
            )),
            InsertMode::ReplaceSpan,
            |_| String::new(),
        )
        .anchor(AnchorCandidate::preprocessor_block(MISPLACED_LOOKUP_SLOW).within(DO_MKNODAT))
        .optional(),
    );
    plan.push(
        PatchOperation::new(
            "namei_drop_misplaced_sdcard_check",
            "misplaced sdcard sus-path block removed from vfs_unlink2()",
            NAMEI_C,
            Signature::absent(Signature::within(
                VFS_UNLINK2,
                Signature::contains(MISPLACED_SDCARD_SUS_PATH),
            )),
            InsertMode::ReplaceSpan,
            |_| String::new(),
        )
        .anchor(AnchorCandidate::preprocessor_block(MISPLACED_SDCARD_SUS_PATH).within(VFS_UNLINK2))
        .optional(),
    );
    plan.push(
        PatchOperation::new(
            "namei_redirect_decl",
            "susfs_get_redirected_path extern",
            NAMEI_C,
            Signature::contains(REDIRECT_EXTERN),
            InsertMode::InsertBefore,
            |_| NAMEI_REDIRECT_DECL.to_string(),
        )
        .anchor(AnchorCandidate::literal(
            "struct file *do_filp_open(int dfd, struct filename *pathname,",
        )),
    );
    plan.push(
        PatchOperation::new(
            "namei_fake_pathname",
            "fake_pathname local in do_filp_open()",
            NAMEI_C,
            Signature::within(DO_FILP_OPEN, Signature::contains(FAKE_PATHNAME_LOCAL)),
            InsertMode::InsertAfter,
            |_| NAMEI_FAKE_PATHNAME.to_string(),
        )
        .anchor(AnchorCandidate::literal("\tstruct file *filp;\n").within(DO_FILP_OPEN)),
    );
    plan.push(
        PatchOperation::new(
            "namei_open_redirect",
            "open redirect in do_filp_open()",
            NAMEI_C,
            Signature::contains("fake_pathname = susfs_get_redirected_path(filp->f_inode->i_ino);"),
            InsertMode::InsertAfter,
            |_| NAMEI_OPEN_REDIRECT.to_string(),
        )
        .anchor(
            AnchorCandidate::literal(
                "\tif (unlikely(filp == ERR_PTR(-ESTALE)))\n\t\tfilp = path_openat(&nd, op, flags | LOOKUP_REVAL);\n",
            )
            .within(DO_FILP_OPEN),
        )
        .anchor(
            AnchorCandidate::literal("\t\tfilp = path_openat(&nd, op, flags | LOOKUP_REVAL);\n")
                .within(DO_FILP_OPEN),
        ),
    );

    // kernel/kallsyms.c
    plan.push(
        PatchOperation::new(
            "kallsyms_hide_symbols",
            "KernelSU/SUSFS symbols hidden in s_show()",
            KALLSYMS_C,
            Signature::contains("susfs_starts_with(iter->name, \"ksu_\")"),
            InsertMode::ReplaceSpan,
            |_| get_kallsyms_hide_block(),
        )
        .anchor(AnchorCandidate::literal(
            "\t} else\n\t\tseq_printf(m, \"%px %c %s\\n\", value,\n\t\t\t   iter->type, iter->name);\n\treturn 0;\n}",
        ))
        .anchor(AnchorCandidate::from_regex(KALLSYMS_ELSE_TAIL.clone()).within(S_SHOW)),
    );

    // fs/proc/task_mmu.c
    plan.push(
        PatchOperation::new(
            "pagemap_sus_map_guard",
            "SUS_MAP guard in pagemap_read()",
            TASK_MMU_C,
            Signature::within(
                PAGEMAP_READ,
                Signature::AllOf(vec![
                    Signature::contains(PAGEMAP_FIND_VMA),
                    Signature::contains("BIT_SUS_MAPS"),
                ]),
            ),
            InsertMode::ReplaceSpan,
            get_sus_map_guard,
        )
        .anchor(
            AnchorCandidate::literal("\t\tmmap_read_unlock(mm);\n\t\tstart_vaddr = end;")
                .within(PAGEMAP_READ),
        )
        .anchor(
            AnchorCandidate::literal("\t\tup_read(&mm->mmap_sem);\n\t\tstart_vaddr = end;")
                .within(PAGEMAP_READ),
        )
        .anchor(AnchorCandidate::from_regex(PAGEMAP_UNLOCK.clone()).within(PAGEMAP_READ)),
    );

    plan
}

/// Post-conditions of [`susfs_plan`], evaluated on the tree as it is on disk.
pub fn susfs_checks() -> Vec<VerificationCheck> {
    vec![
        VerificationCheck::literal(MOUNT_H, "susfs_mnt_id_backup", "vfsmount backup field"),
        VerificationCheck::literal(MOUNT_H, "u64 susfs_mnt_id_backup", "backup field is u64")
            .warn_only(),
        VerificationCheck::literal(PROC_NAMESPACE_C, "#include <linux/susfs_def.h>", "susfs_def.h included"),
        VerificationCheck::literal(PROC_NAMESPACE_C, HIDE_SUS_MNTS_EXTERN, "sus-mount switch declared"),
        VerificationCheck::literal(PROC_NAMESPACE_C, KSU_DOMAIN_EXTERN, "susfs_is_current_ksu_domain declared"),
        VerificationCheck::call_site(
            PROC_NAMESPACE_C,
            "susfs_is_current_ksu_domain",
            "show_mountinfo() calls susfs_is_current_ksu_domain",
        )
        .within(SHOW_MOUNTINFO),
        VerificationCheck::literal(
            PROC_NAMESPACE_C,
            "susfs_hide_sus_mnts_for_non_su_procs &&",
            "sus-mount filter present",
        )
        .within(SHOW_MOUNTINFO),
        VerificationCheck::literal(CMDLINE_C, CMDLINE_EXTERN, "spoof hook declared"),
        VerificationCheck::call_site(
            CMDLINE_C,
            "susfs_spoof_cmdline_or_bootconfig",
            "cmdline_proc_show() calls the spoof hook",
        )
        .within(CMDLINE_PROC_SHOW),
        VerificationCheck::literal(NAMEI_C, "#include <linux/susfs_def.h>", "susfs_def.h included"),
        VerificationCheck::literal(NAMEI_C, REDIRECT_EXTERN, "susfs_get_redirected_path declared"),
        VerificationCheck::literal(NAMEI_C, FAKE_PATHNAME_LOCAL, "do_filp_open() declares fake_pathname")
            .within(DO_FILP_OPEN),
        VerificationCheck::call_site(
            NAMEI_C,
            "susfs_get_redirected_path",
            "do_filp_open() calls susfs_get_redirected_path",
        )
        .within(DO_FILP_OPEN),
        VerificationCheck::absent(NAMEI_C, BIT_OPEN_REDIRECT_WRONG, "no BIT_OPEN_REDIRECT test on i_state"),
        VerificationCheck::absent(NAMEI_C, MISPLACED_LOOKUP_SLOW, "no lookup_slow fragment in do_mknodat()")
            .within(DO_MKNODAT),
        VerificationCheck::absent(NAMEI_C, MISPLACED_SDCARD_SUS_PATH, "no sdcard block in vfs_unlink2()")
            .within(VFS_UNLINK2),
        VerificationCheck::call_site(KALLSYMS_C, "susfs_starts_with", "s_show() filters hidden symbols")
            .within(S_SHOW),
        VerificationCheck::call_site(
            TASK_MMU_C,
            "susfs_is_current_proc_umounted",
            "pagemap_read() calls susfs_is_current_proc_umounted",
        )
        .within(PAGEMAP_READ),
        VerificationCheck::literal(TASK_MMU_C, PAGEMAP_FIND_VMA, "pagemap_read() looks up the vma")
            .within(PAGEMAP_READ),
        VerificationCheck::literal(TASK_MMU_C, "BIT_SUS_MAPS", "pagemap_read() tests BIT_SUS_MAPS")
            .within(PAGEMAP_READ),
    ]
}
