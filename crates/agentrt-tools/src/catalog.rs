//! Built-in tool catalog (spec.md §4.4's table), scopes matching
//! `original_source/apps/api/olympus_api/planner.py::TOOL_SCOPE` exactly:
//!
//! | capability      | scope        |
//! |-----------------|--------------|
//! | fs.read         | read_fs      |
//! | fs.write        | write_fs     |
//! | fs.delete       | delete_fs    |
//! | fs.list         | list_fs      |
//! | fs.glob         | list_fs      |
//! | fs.search       | search_fs    |
//! | shell.run       | exec_shell   |
//! | git.status      | git_ops      |
//! | git.add         | git_ops      |
//! | git.commit      | git_ops      |
//! | net.http_get    | net_get      |

use std::process::Stdio;
use std::sync::Arc;

use agentrt_core::{AppError, ConsentScope};
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::process::Command;

use crate::registry::{Tool, ToolContext, ToolRegistry};

fn field<'a>(input: &'a Value, key: &str) -> Result<&'a str, AppError> {
    input
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| AppError::ToolFailed(format!("missing required field '{key}'")))
}

pub struct FsRead;

#[async_trait]
impl Tool for FsRead {
    fn name(&self) -> &str {
        "fs.read"
    }
    fn scope(&self) -> ConsentScope {
        ConsentScope::ReadFs
    }
    async fn call(&self, input: Value, ctx: &ToolContext) -> Result<Value, AppError> {
        let requested = field(&input, "path")?;
        let path = ctx.sandbox.resolve(requested)?;
        let bytes = tokio::fs::read(&path).await.map_err(|e| AppError::ToolFailed(format!("fs.read {}: {e}", path.display())))?;
        let content = String::from_utf8_lossy(&bytes).into_owned();
        Ok(json!({ "path": requested, "bytes": bytes.len(), "content": content }))
    }
}

pub struct FsWrite;

#[async_trait]
impl Tool for FsWrite {
    fn name(&self) -> &str {
        "fs.write"
    }
    fn scope(&self) -> ConsentScope {
        ConsentScope::WriteFs
    }
    async fn call(&self, input: Value, ctx: &ToolContext) -> Result<Value, AppError> {
        let path = ctx.sandbox.resolve(field(&input, "path")?)?;
        let contents = field(&input, "content").or_else(|_| field(&input, "contents"))?;
        let overwrite = input.get("overwrite").and_then(Value::as_bool).unwrap_or(true);
        if !overwrite && tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Err(AppError::ToolFailed(format!("fs.write {}: already exists and overwrite is false", path.display())));
        }
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| AppError::ToolFailed(format!("fs.write {}: {e}", path.display())))?;
        }
        tokio::fs::write(&path, contents)
            .await
            .map_err(|e| AppError::ToolFailed(format!("fs.write {}: {e}", path.display())))?;
        Ok(json!({ "bytes_written": contents.len() }))
    }
}

pub struct FsDelete;

#[async_trait]
impl Tool for FsDelete {
    fn name(&self) -> &str {
        "fs.delete"
    }
    fn scope(&self) -> ConsentScope {
        ConsentScope::DeleteFs
    }
    async fn call(&self, input: Value, ctx: &ToolContext) -> Result<Value, AppError> {
        let path = ctx.sandbox.resolve(field(&input, "path")?)?;
        let recursive = input.get("recursive").and_then(Value::as_bool).unwrap_or(false);
        let meta = tokio::fs::metadata(&path).await.map_err(|e| AppError::ToolFailed(format!("fs.delete {}: {e}", path.display())))?;
        if meta.is_dir() {
            if recursive {
                tokio::fs::remove_dir_all(&path).await.map_err(|e| AppError::ToolFailed(format!("fs.delete {}: {e}", path.display())))?;
            } else {
                tokio::fs::remove_dir(&path).await.map_err(|e| AppError::ToolFailed(format!("fs.delete {}: {e}", path.display())))?;
            }
        } else {
            tokio::fs::remove_file(&path).await.map_err(|e| AppError::ToolFailed(format!("fs.delete {}: {e}", path.display())))?;
        }
        Ok(json!({ "deleted": true }))
    }
}

pub struct FsList;

#[async_trait]
impl Tool for FsList {
    fn name(&self) -> &str {
        "fs.list"
    }
    fn scope(&self) -> ConsentScope {
        ConsentScope::ListFs
    }
    async fn call(&self, input: Value, ctx: &ToolContext) -> Result<Value, AppError> {
        let raw = input.get("path").and_then(Value::as_str).unwrap_or(".");
        let path = ctx.sandbox.resolve(raw)?;
        let mut entries = tokio::fs::read_dir(&path)
            .await
            .map_err(|e| AppError::ToolFailed(format!("fs.list {}: {e}", path.display())))?;
        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| AppError::ToolFailed(format!("fs.list {}: {e}", path.display())))?
        {
            names.push(entry.file_name().to_string_lossy().to_string());
        }
        names.sort();
        Ok(json!({ "entries": names }))
    }
}

pub struct FsGlob;

#[async_trait]
impl Tool for FsGlob {
    fn name(&self) -> &str {
        "fs.glob"
    }
    fn scope(&self) -> ConsentScope {
        ConsentScope::ListFs
    }
    async fn call(&self, input: Value, ctx: &ToolContext) -> Result<Value, AppError> {
        let pattern = field(&input, "pattern")?;
        let root = ctx.sandbox.root().to_path_buf();
        let full_pattern = root.join(pattern);
        let full_pattern_str = full_pattern.to_string_lossy().to_string();

        let matches: Vec<String> = glob::glob(&full_pattern_str)
            .map_err(|e| AppError::ToolFailed(format!("fs.glob invalid pattern '{pattern}': {e}")))?
            .filter_map(Result::ok)
            .filter_map(|p| p.strip_prefix(&root).ok().map(|rel| rel.to_string_lossy().to_string()))
            .collect();
        Ok(json!({ "matches": matches }))
    }
}

pub struct FsSearch;

#[async_trait]
impl Tool for FsSearch {
    fn name(&self) -> &str {
        "fs.search"
    }
    fn scope(&self) -> ConsentScope {
        ConsentScope::SearchFs
    }
    async fn call(&self, input: Value, ctx: &ToolContext) -> Result<Value, AppError> {
        let pattern_str = field(&input, "pattern")?;
        let rel_path = input.get("path").and_then(Value::as_str).unwrap_or(".");
        let path = ctx.sandbox.resolve(rel_path)?;
        let pattern = regex::Regex::new(pattern_str).map_err(|e| AppError::ToolFailed(format!("fs.search invalid pattern: {e}")))?;

        let contents = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| AppError::ToolFailed(format!("fs.search {}: {e}", path.display())))?;
        let hits: Vec<Value> = contents
            .lines()
            .enumerate()
            .filter(|(_, line)| pattern.is_match(line))
            .map(|(i, line)| json!({ "line": i + 1, "text": line }))
            .collect();
        Ok(json!({ "matches": hits }))
    }
}

pub struct ShellRun;

#[async_trait]
impl Tool for ShellRun {
    fn name(&self) -> &str {
        "shell.run"
    }
    fn scope(&self) -> ConsentScope {
        ConsentScope::ExecShell
    }
    async fn call(&self, input: Value, ctx: &ToolContext) -> Result<Value, AppError> {
        let command = field(&input, "command")?;
        let timeout_ms = input.get("timeout_ms").and_then(Value::as_u64);

        let child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(ctx.sandbox.root())
            .stdin(Stdio::null())
            .output();

        let output = match timeout_ms {
            Some(ms) => match tokio::time::timeout(std::time::Duration::from_millis(ms), child).await {
                Ok(result) => result.map_err(|e| AppError::ToolFailed(format!("shell.run: {e}")))?,
                Err(_) => {
                    return Ok(json!({ "exit_code": 124, "stdout": "", "stderr": "timed out" }));
                }
            },
            None => child.await.map_err(|e| AppError::ToolFailed(format!("shell.run: {e}")))?,
        };

        Ok(json!({
            "exit_code": output.status.code().unwrap_or(-1),
            "stdout": String::from_utf8_lossy(&output.stdout),
            "stderr": String::from_utf8_lossy(&output.stderr),
        }))
    }
}

async fn run_git(ctx: &ToolContext, args: &[&str]) -> Result<Value, AppError> {
    let output = Command::new("git")
        .args(args)
        .current_dir(ctx.sandbox.root())
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| AppError::ToolFailed(format!("git {}: {e}", args.join(" "))))?;
    if !output.status.success() {
        return Err(AppError::ToolFailed(format!(
            "git {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr)
        )));
    }
    Ok(json!({ "stdout": String::from_utf8_lossy(&output.stdout) }))
}

pub struct GitStatus;

#[async_trait]
impl Tool for GitStatus {
    fn name(&self) -> &str {
        "git.status"
    }
    fn scope(&self) -> ConsentScope {
        ConsentScope::GitOps
    }
    async fn call(&self, _input: Value, ctx: &ToolContext) -> Result<Value, AppError> {
        run_git(ctx, &["status", "--porcelain"]).await
    }
}

pub struct GitAdd;

#[async_trait]
impl Tool for GitAdd {
    fn name(&self) -> &str {
        "git.add"
    }
    fn scope(&self) -> ConsentScope {
        ConsentScope::GitOps
    }
    async fn call(&self, input: Value, ctx: &ToolContext) -> Result<Value, AppError> {
        let path = input.get("path").and_then(Value::as_str).unwrap_or(".");
        run_git(ctx, &["add", path]).await
    }
}

pub struct GitCommit;

#[async_trait]
impl Tool for GitCommit {
    fn name(&self) -> &str {
        "git.commit"
    }
    fn scope(&self) -> ConsentScope {
        ConsentScope::GitOps
    }
    async fn call(&self, input: Value, ctx: &ToolContext) -> Result<Value, AppError> {
        let message = field(&input, "message")?;
        run_git(ctx, &["commit", "-m", message]).await
    }
}

pub struct NetHttpGet;

#[async_trait]
impl Tool for NetHttpGet {
    fn name(&self) -> &str {
        "net.http_get"
    }
    fn scope(&self) -> ConsentScope {
        ConsentScope::NetGet
    }
    async fn call(&self, input: Value, ctx: &ToolContext) -> Result<Value, AppError> {
        let url = field(&input, "url")?;
        let response = ctx.http.get(url).send().await.map_err(|e| AppError::ToolFailed(format!("net.http_get {url}: {e}")))?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| AppError::ToolFailed(format!("net.http_get {url}: {e}")))?;
        Ok(json!({ "status": status, "body": body }))
    }
}

/// Build a registry pre-populated with the full built-in catalog.
pub fn builtin_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(FsRead));
    registry.register(Arc::new(FsWrite));
    registry.register(Arc::new(FsDelete));
    registry.register(Arc::new(FsList));
    registry.register(Arc::new(FsGlob));
    registry.register(Arc::new(FsSearch));
    registry.register(Arc::new(ShellRun));
    registry.register(Arc::new(GitStatus));
    registry.register(Arc::new(GitAdd));
    registry.register(Arc::new(GitCommit));
    registry.register(Arc::new(NetHttpGet));
    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentrt_core::{CapabilityRef, ConsentToken};
    use std::sync::Arc as StdArc;

    fn ctx_in(root: &std::path::Path) -> ToolContext {
        ToolContext::new(StdArc::new(agentrt_sandbox::Sandbox::new(root).unwrap()))
    }

    #[test]
    fn builtin_registry_covers_the_full_catalog() {
        let registry = builtin_registry();
        for name in [
            "fs.read",
            "fs.write",
            "fs.delete",
            "fs.list",
            "fs.glob",
            "fs.search",
            "shell.run",
            "git.status",
            "git.add",
            "git.commit",
            "net.http_get",
        ] {
            assert!(registry.resolve(name).is_ok(), "missing builtin tool {name}");
        }
    }

    #[test]
    fn scopes_match_the_original_tool_scope_mapping() {
        assert_eq!(FsRead.scope(), ConsentScope::ReadFs);
        assert_eq!(FsWrite.scope(), ConsentScope::WriteFs);
        assert_eq!(FsDelete.scope(), ConsentScope::DeleteFs);
        assert_eq!(FsList.scope(), ConsentScope::ListFs);
        assert_eq!(FsGlob.scope(), ConsentScope::ListFs);
        assert_eq!(FsSearch.scope(), ConsentScope::SearchFs);
        assert_eq!(ShellRun.scope(), ConsentScope::ExecShell);
        assert_eq!(GitStatus.scope(), ConsentScope::GitOps);
        assert_eq!(GitAdd.scope(), ConsentScope::GitOps);
        assert_eq!(GitCommit.scope(), ConsentScope::GitOps);
        assert_eq!(NetHttpGet.scope(), ConsentScope::NetGet);
    }

    #[tokio::test]
    async fn fs_write_then_fs_read_round_trips_contents() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx_in(dir.path());

        FsWrite
            .call(json!({"path": "note.txt", "content": "hello sandbox"}), &ctx)
            .await
            .unwrap();
        let out = FsRead.call(json!({"path": "note.txt"}), &ctx).await.unwrap();
        assert_eq!(out["content"], "hello sandbox");
        assert_eq!(out["path"], "note.txt");
        assert_eq!(out["bytes"], "hello sandbox".len());
    }

    #[tokio::test]
    async fn fs_write_rejects_path_escape() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx_in(dir.path());
        let err = FsWrite.call(json!({"path": "../escape.txt", "content": "x"}), &ctx).await.unwrap_err();
        assert!(matches!(err, AppError::PathEscape(_)));
    }

    #[tokio::test]
    async fn fs_list_reports_written_file() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx_in(dir.path());
        FsWrite.call(json!({"path": "a.txt", "content": "x"}), &ctx).await.unwrap();
        let out = FsList.call(json!({}), &ctx).await.unwrap();
        assert_eq!(out["entries"], json!(["a.txt"]));
    }

    #[tokio::test]
    async fn fs_search_finds_matching_lines() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx_in(dir.path());
        FsWrite
            .call(json!({"path": "log.txt", "content": "ok\nERROR boom\nok\n"}), &ctx)
            .await
            .unwrap();
        let out = FsSearch.call(json!({"path": "log.txt", "pattern": "ERROR"}), &ctx).await.unwrap();
        let matches = out["matches"].as_array().unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0]["line"], 2);
    }

    #[tokio::test]
    async fn shell_run_captures_exit_code_and_stdout() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx_in(dir.path());
        let out = ShellRun.call(json!({"command": "echo hi"}), &ctx).await.unwrap();
        assert_eq!(out["exit_code"], 0);
        assert_eq!(out["stdout"].as_str().unwrap().trim(), "hi");
    }

    #[tokio::test]
    async fn fs_delete_non_recursive_fails_on_non_empty_directory() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx_in(dir.path());
        FsWrite.call(json!({"path": "notes/a.txt", "content": "x"}), &ctx).await.unwrap();
        let err = FsDelete.call(json!({"path": "notes"}), &ctx).await.unwrap_err();
        assert!(matches!(err, AppError::ToolFailed(_)));
        assert!(dir.path().join("notes/a.txt").exists());
    }

    #[tokio::test]
    async fn fs_delete_recursive_removes_a_non_empty_directory() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx_in(dir.path());
        FsWrite.call(json!({"path": "notes/a.txt", "content": "x"}), &ctx).await.unwrap();
        let out = FsDelete.call(json!({"path": "notes", "recursive": true}), &ctx).await.unwrap();
        assert_eq!(out["deleted"], true);
        assert!(!dir.path().join("notes").exists());
    }

    #[tokio::test]
    async fn shell_run_reports_exit_124_on_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx_in(dir.path());
        let out = ShellRun.call(json!({"command": "sleep 2", "timeout_ms": 50}), &ctx).await.unwrap();
        assert_eq!(out["exit_code"], 124);
    }

    #[tokio::test]
    async fn registry_invoke_denies_consent_before_touching_disk() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx_in(dir.path());
        let registry = builtin_registry();
        let consent = ConsentToken::new([ConsentScope::ReadFs]);
        let err = registry
            .invoke(&CapabilityRef::new("fs.write"), json!({"path": "x.txt", "content": "x"}), &consent, &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ConsentDenied(_)));
        assert!(!dir.path().join("x.txt").exists());
    }
}
