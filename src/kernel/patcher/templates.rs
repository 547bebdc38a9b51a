//! C source templates for the SUSFS patch plan.
//!
//! This module holds the code blocks injected into the kernel tree together
//! with the small placeholder renderer used by content builders. Blocks that
//! depend on the match site (indentation, the unlock call in use) are
//! [`Template`]s rendered against the captured [`AnchorContext`]; the rest
//! are plain constants.

use crate::kernel::anchor::AnchorContext;

/// Content template with `{name}` placeholders.
///
/// Placeholders are filled from the anchor context. `{{` and `}}` produce
/// literal braces. A placeholder with no captured value is left verbatim, so
/// C braces in templates survive unescaped as long as they do not enclose a
/// bare identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template(String);

impl Template {
    pub fn new(source: impl Into<String>) -> Self {
        Template(source.into())
    }

    pub fn render(&self, context: &AnchorContext) -> String {
        let mut out = String::with_capacity(self.0.len());
        let mut rest = self.0.as_str();

        while let Some(pos) = rest.find(|c: char| c == '{' || c == '}') {
            out.push_str(&rest[..pos]);
            let tail = &rest[pos..];

            if tail.starts_with("{{") || tail.starts_with("}}") {
                out.push_str(&tail[..1]);
                rest = &tail[2..];
                continue;
            }

            if tail.starts_with('{') {
                if let Some(close) = tail[1..].find('}') {
                    let name = &tail[1..1 + close];
                    if is_placeholder_name(name) {
                        if let Some(value) = context.get(name) {
                            out.push_str(value);
                            rest = &tail[close + 2..];
                            continue;
                        }
                    }
                }
            }

            out.push_str(&tail[..1]);
            rest = &tail[1..];
        }

        out.push_str(rest);
        out
    }
}

fn is_placeholder_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

// ============================================================================
// include/linux/mount.h
// ============================================================================

/// `struct vfsmount` tail for trees carrying the ANDROID_KABI macro family:
/// reserve slot 4 is repurposed when SUSFS is enabled.
pub const MOUNT_KABI_FIELD: &str = "#ifdef CONFIG_KSU_SUSFS\n\
\tANDROID_KABI_USE(4, u64 susfs_mnt_id_backup);\n\
#else\n\
\tANDROID_KABI_RESERVE(4);\n\
#endif\n\
} __randomize_layout;";

/// `struct vfsmount` tail for trees without ANDROID_KABI reserve slots.
pub const MOUNT_PLAIN_FIELD: &str = "#ifdef CONFIG_KSU_SUSFS\n\
\tu64 susfs_mnt_id_backup;\n\
#endif\n\
} __randomize_layout;";

/// Picks the field layout matching the struct tail that was found.
pub fn get_mount_field(context: &AnchorContext) -> String {
    if context.matched().contains("ANDROID_KABI_RESERVE(4);") {
        MOUNT_KABI_FIELD.to_string()
    } else {
        MOUNT_PLAIN_FIELD.to_string()
    }
}

// ============================================================================
// fs/proc_namespace.c
// ============================================================================

pub const PROC_NAMESPACE_DECLS: &str = "\n#ifdef CONFIG_KSU_SUSFS_SUS_MOUNT\n\
#include <linux/susfs_def.h>\n\
extern bool susfs_hide_sus_mnts_for_non_su_procs;\n\
extern bool susfs_is_current_ksu_domain(void);\n\
#endif\n";

pub const SHOW_MOUNTINFO_FILTER: &str = "#ifdef CONFIG_KSU_SUSFS_SUS_MOUNT\n\
\tif (susfs_hide_sus_mnts_for_non_su_procs &&\n\
\t\t\tr->mnt_id >= DEFAULT_KSU_MNT_ID &&\n\
\t\t\t!susfs_is_current_ksu_domain())\n\
\t{\n\
\t\treturn 0;\n\
\t}\n\
#endif\n\
\n";

// ============================================================================
// fs/proc/cmdline.c
// ============================================================================

pub const CMDLINE_DECL: &str = "\n#ifdef CONFIG_KSU_SUSFS_SPOOF_CMDLINE_OR_BOOTCONFIG\n\
extern int susfs_spoof_cmdline_or_bootconfig(struct seq_file *m);\n\
#endif\n";

/// Spoof hook placed ahead of the real command line output. Identical for
/// the `seq_puts` and the older `seq_printf` API.
pub const CMDLINE_HOOK: &str = "#ifdef CONFIG_KSU_SUSFS_SPOOF_CMDLINE_OR_BOOTCONFIG\n\
\tif (!susfs_spoof_cmdline_or_bootconfig(m)) {\n\
\t\tseq_putc(m, '\\n');\n\
\t\treturn 0;\n\
\t}\n\
#endif\n";

// ============================================================================
// fs/namei.c
// ============================================================================

pub const NAMEI_SUSFS_DEF_INCLUDE: &str =
    "#if defined(CONFIG_KSU_SUSFS_SUS_PATH) || defined(CONFIG_KSU_SUSFS_OPEN_REDIRECT)\n\
#include <linux/susfs_def.h>\n\
#endif\n";

/// Include placement depends on the anchor: after `<linux/uaccess.h>`,
/// otherwise in front of `"mount.h"`.
pub fn get_namei_include(context: &AnchorContext) -> String {
    let matched = context.matched();
    if matched.starts_with("#include <linux/uaccess.h>") {
        format!("{}{}", matched, NAMEI_SUSFS_DEF_INCLUDE)
    } else {
        format!("{}{}", NAMEI_SUSFS_DEF_INCLUDE, matched)
    }
}

/// Field test injected by an older reject fix; the inode flag lives in the
/// address space, not in `i_state`.
pub const BIT_OPEN_REDIRECT_WRONG: &str = "filp->f_inode->i_state & BIT_OPEN_REDIRECT";
pub const BIT_OPEN_REDIRECT_CORRECT: &str = "filp->f_inode->i_mapping->flags & BIT_OPEN_REDIRECT";

/// Opening of the lookup_slow() fragment that lands in do_mknodat().
pub const MISPLACED_LOOKUP_SLOW: &str =
    "#ifdef CONFIG_KSU_SUSFS_SUS_PATH\n\tif (is_nd_flags_lookup_last && !found_sus_path)";

/// Opening of the sdcard sus-path block that lands in vfs_unlink2().
pub const MISPLACED_SDCARD_SUS_PATH: &str =
    "#ifdef CONFIG_KSU_SUSFS_SUS_PATH\n\t\t\tif (nd->state & ND_STATE_LAST_SDCARD_SUS_PATH)";

pub const NAMEI_REDIRECT_DECL: &str = "#ifdef CONFIG_KSU_SUSFS_OPEN_REDIRECT\n\
extern struct filename *susfs_get_redirected_path(unsigned long ino);\n\
#endif\n\
\n";

pub const NAMEI_FAKE_PATHNAME: &str = "#ifdef CONFIG_KSU_SUSFS_OPEN_REDIRECT\n\
\tstruct filename *fake_pathname;\n\
#endif\n";

pub const NAMEI_OPEN_REDIRECT: &str = "#ifdef CONFIG_KSU_SUSFS_OPEN_REDIRECT\n\
\tif (!IS_ERR(filp) && unlikely(filp->f_inode->i_mapping->flags & BIT_OPEN_REDIRECT) &&\n\
\t\t\tcurrent_uid().val < 11000) {\n\
\t\tfake_pathname = susfs_get_redirected_path(filp->f_inode->i_ino);\n\
\t\tif (!IS_ERR(fake_pathname)) {\n\
\t\t\trestore_nameidata();\n\
\t\t\tfilp_close(filp, NULL);\n\
\t\t\t/* no need to putname(pathname) here - done by calling process */\n\
\t\t\tset_nameidata(&nd, dfd, fake_pathname);\n\
\t\t\tfilp = path_openat(&nd, op, flags | LOOKUP_RCU);\n\
\t\t\tif (unlikely(filp == ERR_PTR(-ECHILD)))\n\
\t\t\t\tfilp = path_openat(&nd, op, flags);\n\
\t\t\tif (unlikely(filp == ERR_PTR(-ESTALE)))\n\
\t\t\t\tfilp = path_openat(&nd, op, flags | LOOKUP_REVAL);\n\
\t\t\trestore_nameidata();\n\
\t\t\tputname(fake_pathname);\n\
\t\t\treturn filp;\n\
\t\t}\n\
\t}\n\
#endif\n";

// ============================================================================
// kernel/kallsyms.c
// ============================================================================

/// Symbol prefixes hidden from /proc/kallsyms.
pub const HIDDEN_SYMBOL_PREFIXES: &[&str] = &[
    "ksu_",
    "__ksu_",
    "susfs_",
    "ksud",
    "is_ksu_",
    "is_manager_",
    "escape_to_",
    "setup_selinux",
    "track_throne",
    "on_post_fs_data",
    "try_umount",
    "kernelsu",
    "__initcall__kmod_kernelsu",
    "apply_kernelsu",
    "handle_sepolicy",
    "getenforce",
    "setenforce",
    "is_zygote",
];

const KALLSYMS_SEQ_PRINTF: &str =
    "\t\tseq_printf(m, \"%px %c %s\\n\", value,\n\t\t\t   iter->type, iter->name);\n";

/// Replacement for the `else` tail of `s_show()`.
pub fn get_kallsyms_hide_block() -> String {
    let tests = HIDDEN_SYMBOL_PREFIXES
        .iter()
        .enumerate()
        .map(|(i, prefix)| {
            let lead = if i == 0 { "\t\tif (" } else { "\t\t\t" };
            format!("{}susfs_starts_with(iter->name, \"{}\")", lead, prefix)
        })
        .collect::<Vec<_>>()
        .join(" ||\n");

    format!(
        "\t}} else {{\n\
#ifndef CONFIG_KSU_SUSFS_HIDE_KSU_SUSFS_SYMBOLS\n\
{printf}\
#else\n\
{tests})\n\
\t\t{{\n\
\t\t\treturn 0;\n\
\t\t}}\n\
{printf}\
#endif\n\
\t}}\n\
\treturn 0;\n\
}}",
        printf = KALLSYMS_SEQ_PRINTF,
        tests = tests
    )
}

// ============================================================================
// fs/proc/task_mmu.c
// ============================================================================

/// SUS_MAP guard for the pagemap_read() walk loop, indented like the
/// unlock call it follows.
pub const SUS_MAP_GUARD: &str = "#ifdef CONFIG_KSU_SUSFS_SUS_MAP\n\
{indent}vma = find_vma(mm, start_vaddr);\n\
{indent}if (vma && vma->vm_file) {{\n\
{indent}\tstruct inode *inode = file_inode(vma->vm_file);\n\
{indent}\tif (unlikely(inode->i_state & BIT_SUS_MAPS) && susfs_is_current_proc_umounted()) {{\n\
{indent}\t\tpm.show_pfn = false;\n\
{indent}\t\tpm.buffer->pme = 0;\n\
{indent}\t}}\n\
{indent}}}\n\
#endif\n";

/// Splits the matched `unlock\nstart_vaddr = end;` pair and puts the guard
/// between the two lines.
pub fn get_sus_map_guard(context: &AnchorContext) -> String {
    let guard = Template::new(SUS_MAP_GUARD).render(context);
    match context.matched().split_once('\n') {
        Some((unlock, tail)) => format!("{}\n{}{}", unlock, guard, tail),
        None => format!("{}\n{}", context.matched(), guard),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(pairs: &[(&str, &str)]) -> AnchorContext {
        let mut ctx = AnchorContext::default();
        for (k, v) in pairs {
            ctx.insert(*k, *v);
        }
        ctx
    }

    #[test]
    fn test_render_fills_placeholders() {
        let ctx = context(&[("indent", "\t\t"), ("lock", "mmap_lock")]);
        let out = Template::new("{indent}release({lock});\n").render(&ctx);
        assert_eq!(out, "\t\trelease(mmap_lock);\n");
    }

    #[test]
    fn test_render_escapes_and_unknown_names() {
        let ctx = context(&[("indent", "\t")]);
        let out = Template::new("if (x) {{\n{indent}{unknown}\n}}").render(&ctx);
        assert_eq!(out, "if (x) {\n\t{unknown}\n}");
        let out = Template::new("struct path p = { .dentry = d };").render(&ctx);
        assert_eq!(out, "struct path p = { .dentry = d };");
    }

    #[test]
    fn test_mount_field_follows_matched_tail() {
        let kabi = context(&[("matched", "\tANDROID_KABI_RESERVE(4);\n} __randomize_layout;")]);
        assert!(get_mount_field(&kabi).contains("ANDROID_KABI_USE(4, u64 susfs_mnt_id_backup);"));
        let plain = context(&[("matched", "} __randomize_layout;")]);
        let field = get_mount_field(&plain);
        assert!(field.contains("\tu64 susfs_mnt_id_backup;"));
        assert!(field.ends_with("} __randomize_layout;"));
    }

    #[test]
    fn test_namei_include_placement() {
        let after = context(&[("matched", "#include <linux/uaccess.h>\n")]);
        assert!(get_namei_include(&after).starts_with("#include <linux/uaccess.h>\n#if defined"));
        let before = context(&[("matched", "#include \"mount.h\"\n")]);
        assert!(get_namei_include(&before).ends_with("#endif\n#include \"mount.h\"\n"));
    }

    #[test]
    fn test_kallsyms_block_lists_every_prefix() {
        let block = get_kallsyms_hide_block();
        for prefix in HIDDEN_SYMBOL_PREFIXES {
            assert!(block.contains(&format!("susfs_starts_with(iter->name, \"{}\")", prefix)));
        }
        assert!(block.starts_with("\t} else {\n#ifndef CONFIG_KSU_SUSFS_HIDE_KSU_SUSFS_SYMBOLS\n"));
        assert!(block.contains("\"is_zygote\"))\n\t\t{\n\t\t\treturn 0;\n\t\t}\n"));
        assert!(block.ends_with("#endif\n\t}\n\treturn 0;\n}"));
    }

    #[test]
    fn test_sus_map_guard_between_unlock_and_tail() {
        let ctx = context(&[
            ("matched", "\t\tmmap_read_unlock(mm);\n\t\tstart_vaddr = end;"),
            ("indent", "\t\t"),
        ]);
        let out = get_sus_map_guard(&ctx);
        assert!(out.starts_with("\t\tmmap_read_unlock(mm);\n#ifdef CONFIG_KSU_SUSFS_SUS_MAP\n"));
        assert!(out.contains("\t\tvma = find_vma(mm, start_vaddr);\n\t\tif (vma && vma->vm_file) {\n"));
        assert!(out.ends_with("#endif\n\t\tstart_vaddr = end;"));
    }
}
