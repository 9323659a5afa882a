//! 工具名别名表
//!
//! 模型常写出 `fs.read_file`、`filesystem.read_file`、`read_file` 等不同拼写，统一改写为一个规范名。
//! 规范名自身也在表中，未知名字原样返回（去首尾空白），因此 normalize 是幂等的。

/// (别名, 规范名)，按小写匹配
const TOOL_ALIASES: &[(&str, &str)] = &[
    ("fs_read", "fs_read"),
    ("fs.read", "fs_read"),
    ("fs.read_file", "fs_read"),
    ("fs_read_file", "fs_read"),
    ("filesystem.read_file", "fs_read"),
    ("filesystem_read_file", "fs_read"),
    ("file.read", "fs_read"),
    ("read_file", "fs_read"),
    ("fs_write", "fs_write"),
    ("fs.write", "fs_write"),
    ("fs.write_file", "fs_write"),
    ("fs_write_file", "fs_write"),
    ("filesystem.write_file", "fs_write"),
    ("filesystem_write_file", "fs_write"),
    ("file.write", "fs_write"),
    ("write_file", "fs_write"),
    ("fs_list", "fs_list"),
    ("fs.list", "fs_list"),
    ("fs.list_files", "fs_list"),
    ("fs_list_files", "fs_list"),
    ("filesystem.list_files", "fs_list"),
    ("filesystem_list_files", "fs_list"),
    ("list_files", "fs_list"),
    ("list_dir", "fs_list"),
];

/// 已知拼写对应的规范名；未知返回 None
pub fn canonical_tool_name(name: &str) -> Option<&'static str> {
    let needle = name.trim().to_ascii_lowercase();
    TOOL_ALIASES
        .iter()
        .find(|(alias, _)| *alias == needle)
        .map(|(_, canonical)| *canonical)
}

/// 改写为规范名；未知名字原样保留
pub fn normalize_tool_name(name: &str) -> String {
    canonical_tool_name(name)
        .map(str::to_string)
        .unwrap_or_else(|| name.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aliases_map_to_canonical() {
        assert_eq!(normalize_tool_name("fs.read_file"), "fs_read");
        assert_eq!(normalize_tool_name("filesystem.read_file"), "fs_read");
        assert_eq!(normalize_tool_name("read_file"), "fs_read");
        assert_eq!(normalize_tool_name("FS.READ_FILE"), "fs_read");
        assert_eq!(normalize_tool_name("write_file"), "fs_write");
        assert_eq!(normalize_tool_name("list_dir"), "fs_list");
    }

    #[test]
    fn test_unknown_names_pass_through() {
        assert_eq!(normalize_tool_name("  crm.create_lead "), "crm.create_lead");
        assert!(canonical_tool_name("crm.create_lead").is_none());
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let samples = [
            "fs_read",
            "fs.read_file",
            "filesystem.list_files",
            "Write_File",
            "unknown_tool",
            " padded ",
            "",
            "fs_write",
        ];
        for s in samples {
            let once = normalize_tool_name(s);
            assert_eq!(normalize_tool_name(&once), once, "not a fixed point: {s:?}");
        }
    }

    #[test]
    fn test_every_canonical_name_is_a_fixed_point() {
        for (_, canonical) in TOOL_ALIASES {
            assert_eq!(normalize_tool_name(canonical), *canonical);
        }
    }
}
