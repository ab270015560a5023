use std::collections::{BTreeSet, HashSet};
use std::path::Path;
use std::sync::Arc;

use ragex_core::{
    Change, EntityId, Function, FunctionId, Language, Module, ModuleId, RagexError, Result,
    Visibility,
};
use ragex_editor::{EditOptions, Editor, Transaction, TxnOptions, TxnStatus};
use ragex_graph::{EdgeType, GraphStore, NodeData};
use regex::Regex;
use serde_json::json;
use tracing::info;

use crate::rewrite::*;
use crate::types::*;
use crate::undo::UndoHistory;

/// The AST Refactor Operators (C9): each discovers its affected sites via the
/// Graph Store, computes a `Change` set per file using the text-rewrite
/// primitives in [`crate::rewrite`], and commits the result as one
/// `Transaction`, pushing an undo entry on success (§4.9 steps 1-5).
pub struct RefactorEngine {
    graph: Arc<GraphStore>,
    editor: Arc<Editor>,
    undo: Arc<UndoHistory>,
}

impl RefactorEngine {
    pub fn new(graph: Arc<GraphStore>, editor: Arc<Editor>, undo: Arc<UndoHistory>) -> Self {
        Self { graph, editor, undo }
    }

    fn functions_matching(&self, module: &ModuleId, name: &str, arity: Option<u16>) -> Vec<Function> {
        self.graph
            .list_nodes(
                |n| matches!(n, NodeData::Function(f)
                    if &f.id.module == module && f.id.name == name && arity.map_or(true, |a| a == f.id.arity)),
                None,
            )
            .into_iter()
            .filter_map(|n| match n {
                NodeData::Function(f) => Some(f),
                _ => None,
            })
            .collect()
    }

    fn find_module(&self, module: &ModuleId) -> Option<Module> {
        match self.graph.find_node(&EntityId::Module(module.clone())) {
            Some(NodeData::Module(m)) => Some(m),
            _ => None,
        }
    }

    async fn read_file(&self, path: &str) -> Result<String> {
        tokio::fs::read_to_string(path)
            .await
            .map_err(|e| RagexError::io(path.to_string(), e))
    }

    /// Files whose functions hold an incoming `Calls` edge into any of
    /// `targets`, excluding `targets`' own defining files (those are already
    /// covered by the caller's definition-site pass). `Scope::Module` limits
    /// the blast radius to nothing beyond the defining file (§4.9
    /// rename-function "scope module limits to the defining module's file").
    fn caller_files(&self, targets: &[Function], scope: Scope) -> Vec<String> {
        if matches!(scope, Scope::Module) {
            return vec![];
        }
        let mut files = HashSet::new();
        for f in targets {
            let id = EntityId::Function(f.id.clone());
            for edge in self.graph.incoming(&id, Some(EdgeType::Calls)) {
                if let Some(NodeData::Function(caller)) = self.graph.find_node(&edge.from) {
                    files.insert(caller.file);
                }
            }
        }
        files.into_iter().collect()
    }

    /// Resolves `module`'s file if it already exists in the graph, otherwise
    /// derives a plausible path alongside `sibling_file`: same directory and
    /// extension, filename from the module's last dotted segment in
    /// `snake_case`. Documented heuristic (DESIGN.md) since the operator
    /// contracts only supply a module name, never a path, for a module that
    /// doesn't exist yet.
    fn resolve_or_derive_file(&self, module: &ModuleId, sibling_file: &str) -> String {
        if let Some(m) = self.find_module(module) {
            return m.file;
        }
        let ext = Path::new(sibling_file)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("ex");
        let dir = Path::new(sibling_file).parent().unwrap_or_else(|| Path::new("."));
        let last_segment = module.qualified_name.rsplit('.').next().unwrap_or(&module.qualified_name);
        let filename = format!("{}.{}", to_snake_case(last_segment), ext);
        dir.join(filename).to_string_lossy().into_owned()
    }

    /// Commits every `(path, changes)` pair as one transaction with
    /// validation and formatting on, pushing an undo entry first (so the
    /// snapshot is taken before any write, per §4.10 `push`).
    async fn commit_refactor(
        &self,
        operation: &str,
        params: serde_json::Value,
        edits: Vec<(String, Vec<Change>)>,
    ) -> Result<RefactorResult> {
        if edits.is_empty() {
            return Err(RagexError::Invalid(format!("{operation}: no affected sites found")));
        }
        let affected: Vec<String> = edits.iter().map(|(p, _)| p.clone()).collect();
        let undo_id = self
            .undo
            .push(
                operation,
                params,
                &affected,
                "pending",
                &format!("{operation} on {} file(s)", affected.len()),
            )
            .await?;

        let mut txn = Transaction::new(self.editor.clone(), TxnOptions { validate: true });
        for (path, changes) in edits {
            let mut opts = EditOptions::new(Language::from_path(&path));
            opts.format = true;
            txn.add(path, changes, Some(opts));
        }

        let result = txn.commit().await?;
        match result.status {
            TxnStatus::Success => {
                info!(operation, files = affected.len(), "refactor committed");
                Ok(RefactorResult { files_changed: affected, undo_id })
            }
            TxnStatus::Failure => Err(RagexError::Invalid(format!(
                "{operation} failed: {:?}",
                result.errors
            ))),
        }
    }

    // ---- operators (§4.9) ----

    pub async fn rename_function(
        &self,
        module: ModuleId,
        old: &str,
        new: &str,
        arity: Option<u16>,
        scope: Scope,
    ) -> Result<RefactorResult> {
        let targets = self.functions_matching(&module, old, arity);
        if targets.is_empty() {
            return Err(RagexError::NotFound(format!("{module}.{old}")));
        }

        let mut lines_by_file: std::collections::HashMap<String, Vec<u32>> = std::collections::HashMap::new();
        for f in &targets {
            lines_by_file.entry(f.file.clone()).or_default().push(f.line);
        }

        let mut edits = Vec::new();
        for (file, lines) in &lines_by_file {
            let content = self.read_file(file).await?;
            let renamed = rename_def_lines(&content, lines, old, new);
            let (renamed, _) = replace_bare_calls(&renamed, old, new, arity);
            let (renamed, _) = replace_qualified_calls(&renamed, &module.qualified_name, old, new, arity);
            let (renamed, _) = replace_function_reference(&renamed, old, new, arity);
            if let Some(change) = minimal_change(&content, &renamed) {
                edits.push((file.clone(), vec![change]));
            }
        }

        for file in self.caller_files(&targets, scope) {
            if lines_by_file.contains_key(&file) {
                continue;
            }
            let content = self.read_file(&file).await?;
            let (rewritten, n1) = replace_bare_calls(&content, old, new, arity);
            let (rewritten, n2) = replace_qualified_calls(&rewritten, &module.qualified_name, old, new, arity);
            let (rewritten, n3) = replace_function_reference(&rewritten, old, new, arity);
            if n1 + n2 + n3 == 0 {
                continue;
            }
            if let Some(change) = minimal_change(&content, &rewritten) {
                edits.push((file, vec![change]));
            }
        }

        let params = json!({
            "module": module.qualified_name, "old": old, "new": new, "arity": arity,
            "scope": format!("{scope:?}"),
        });
        self.commit_refactor("rename-function", params, edits).await
    }

    /// Nested module paths are matched segment-equal, not substring (§4.9
    /// rename-module). There is no graph index of textual module-segment
    /// occurrences, so every known file is a rewrite candidate; files with no
    /// match are simply a no-op diff and are dropped before committing.
    pub async fn rename_module(&self, old: &str, new: &str) -> Result<RefactorResult> {
        let mut files = HashSet::new();
        for node in self.graph.list_nodes(|_| true, None) {
            files.insert(node.file().to_string());
        }

        let mut edits = Vec::new();
        for file in files {
            let content = self.read_file(&file).await?;
            let (rewritten, n) = replace_module_segment(&content, old, new);
            if n == 0 {
                continue;
            }
            if let Some(change) = minimal_change(&content, &rewritten) {
                edits.push((file, vec![change]));
            }
        }

        let params = json!({"old": old, "new": new});
        self.commit_refactor("rename-module", params, edits).await
    }

    pub async fn extract_function(
        &self,
        module: ModuleId,
        source_fn: &str,
        arity: u16,
        new_name: &str,
        line_range: (u32, u32),
        opts: ExtractOptions,
    ) -> Result<RefactorResult> {
        let fid = FunctionId::new(module.clone(), source_fn, arity);
        let func = match self.graph.find_node(&EntityId::Function(fid.clone())) {
            Some(NodeData::Function(f)) => f,
            _ => return Err(RagexError::NotFound(format!("{fid}"))),
        };

        let content = self.read_file(&func.file).await?;
        let lines: Vec<&str> = content.lines().collect();
        let (start, end) = (line_range.0 as usize, line_range.1 as usize);
        if start == 0 || end > lines.len() || start > end {
            return Err(RagexError::Invalid(format!(
                "line range {}..{} out of bounds for {fid}",
                line_range.0, line_range.1
            )));
        }

        let def_start_idx = (func.line.max(1) - 1) as usize;
        let (def_start, def_end) = function_body_span(&lines, def_start_idx);
        let def_line = lines.get(def_start).copied().unwrap_or("");
        let source_params: Vec<String> = split_param_list(def_line, source_fn)
            .map(|(_, params_str, _)| split_top_level_args(params_str).iter().map(|p| param_base_name(p)).collect())
            .unwrap_or_default();

        let body_lines = &lines[start - 1..end];
        let body = body_lines.join("\n");
        let free_vars = extract_free_variables(&body, &source_params);
        let params_list = free_vars.join(", ");

        let leading_ws: String = body_lines[0].chars().take_while(|c| c.is_whitespace()).collect();
        let call_line = format!("{leading_ws}{new_name}({params_list})");

        let kw = if opts.visibility == Visibility::Public { "def" } else { "defp" };
        let mut new_fn_lines = vec![String::new()];
        if opts.add_doc {
            new_fn_lines.push(format!("{leading_ws}# TODO: document {new_name}"));
        }
        new_fn_lines.push(format!("{leading_ws}{kw} {new_name}({params_list}) do"));
        new_fn_lines.push(body);
        new_fn_lines.push(format!("{leading_ws}end"));
        let new_fn_text = new_fn_lines.join("\n");

        let insert_line: u32 = match opts.placement {
            Placement::AfterSource => (def_end + 1) as u32,
            Placement::BeforeSource => (def_start + 1) as u32,
            Placement::EndOfModule => (lines.len() + 1) as u32,
        };

        let changes = vec![
            Change::Replace {
                line_start: line_range.0,
                line_end: line_range.1,
                content: call_line,
            },
            Change::Insert {
                line_start: insert_line,
                content: new_fn_text,
            },
        ];

        let params = json!({
            "module": module.qualified_name, "source_fn": source_fn, "arity": arity,
            "new_name": new_name, "line_range": [line_range.0, line_range.1],
        });
        self.commit_refactor("extract-function", params, vec![(func.file.clone(), changes)]).await
    }

    /// Fails outright if the function has more than one clause, per the
    /// explicitly documented limitation in §4.9 inline-function.
    pub async fn inline_function(&self, module: ModuleId, fn_name: &str, arity: u16) -> Result<RefactorResult> {
        let fid = FunctionId::new(module, fn_name, arity);
        let clauses = self.functions_matching(&fid.module, fn_name, Some(arity));
        if clauses.len() > 1 {
            return Err(RagexError::Invalid(format!(
                "{fid} has {} clauses, inline-function requires exactly one",
                clauses.len()
            )));
        }
        let func = clauses.into_iter().next().ok_or_else(|| RagexError::NotFound(format!("{fid}")))?;

        let def_content = self.read_file(&func.file).await?;
        let def_lines: Vec<&str> = def_content.lines().collect();
        let start_idx = (func.line.max(1) - 1) as usize;
        let (def_start, def_end) = function_body_span(&def_lines, start_idx);
        let def_line = def_lines.get(def_start).copied().unwrap_or("");
        let (_, params_str, _) = split_param_list(def_line, fn_name)
            .ok_or_else(|| RagexError::Invalid(format!("could not parse parameter list for {fid}")))?;
        let params: Vec<String> = split_top_level_args(params_str).iter().map(|p| param_base_name(p)).collect();
        let body_start = (def_start + 1).min(def_end);
        let body_end = def_end.saturating_sub(1).max(body_start);
        let body = def_lines[body_start..body_end].join("\n");

        let id = EntityId::Function(func.id.clone());
        let mut caller_files = HashSet::new();
        for edge in self.graph.incoming(&id, Some(EdgeType::Calls)) {
            if let Some(NodeData::Function(caller)) = self.graph.find_node(&edge.from) {
                caller_files.insert(caller.file);
            }
        }

        let mut files_to_change = caller_files.clone();
        files_to_change.insert(func.file.clone());

        let mut edits = Vec::new();
        for file in files_to_change {
            let content = self.read_file(&file).await?;
            let mut new_content = if caller_files.contains(&file) {
                inline_calls(&content, fn_name, arity, &params, &body)
            } else {
                content.clone()
            };
            if file == func.file {
                let lines: Vec<&str> = new_content.lines().collect();
                let remaining: Vec<&str> = lines
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| *i < def_start || *i >= def_end)
                    .map(|(_, l)| *l)
                    .collect();
                new_content = remaining.join("\n") + if new_content.ends_with('\n') { "\n" } else { "" };
            }
            if let Some(change) = minimal_change(&content, &new_content) {
                edits.push((file, vec![change]));
            }
        }

        let params_json = json!({"module": fid.module.qualified_name, "fn": fn_name, "arity": arity});
        self.commit_refactor("inline-function", params_json, edits).await
    }

    pub async fn move_function(
        &self,
        src_module: ModuleId,
        tgt_module: ModuleId,
        fn_name: &str,
        arity: u16,
        opts: MoveOptions,
    ) -> Result<RefactorResult> {
        let fid = FunctionId::new(src_module.clone(), fn_name, arity);
        let func = match self.graph.find_node(&EntityId::Function(fid.clone())) {
            Some(NodeData::Function(f)) => f,
            _ => return Err(RagexError::NotFound(format!("{fid}"))),
        };

        let src_content = self.read_file(&func.file).await?;
        let src_lines: Vec<&str> = src_content.lines().collect();
        let start_idx = (func.line.max(1) - 1) as usize;
        let (def_start, def_end) = function_body_span(&src_lines, start_idx);
        let def_text = src_lines[def_start..def_end].join("\n");

        let remaining: Vec<&str> = src_lines
            .iter()
            .enumerate()
            .filter(|(i, _)| *i < def_start || *i >= def_end)
            .map(|(_, l)| *l)
            .collect();
        let new_src_content = remaining.join("\n") + if src_content.ends_with('\n') { "\n" } else { "" };

        let tgt_file = self.resolve_or_derive_file(&tgt_module, &func.file);
        let tgt_exists = tokio::fs::metadata(&tgt_file).await.is_ok();
        let tgt_content = if tgt_exists {
            self.read_file(&tgt_file).await?
        } else {
            opts.target_content.clone().unwrap_or_default()
        };
        if !tgt_exists {
            tokio::fs::write(&tgt_file, tgt_content.as_bytes())
                .await
                .map_err(|e| RagexError::io(tgt_file.clone(), e))?;
        }
        let sep = if tgt_content.is_empty() || tgt_content.ends_with('\n') { "" } else { "\n" };
        let new_tgt_content = format!("{tgt_content}{sep}{def_text}\n");

        let mut edits = Vec::new();
        for file in self.caller_files(std::slice::from_ref(&func), Scope::Project) {
            if file == func.file || file == tgt_file {
                continue;
            }
            let content = self.read_file(&file).await?;
            let (rewritten, n) = replace_call_qualifier(&content, &src_module.qualified_name, &tgt_module.qualified_name, fn_name);
            if n == 0 {
                continue;
            }
            if let Some(change) = minimal_change(&content, &rewritten) {
                edits.push((file, vec![change]));
            }
        }

        if let Some(change) = minimal_change(&src_content, &new_src_content) {
            edits.push((func.file.clone(), vec![change]));
        }
        if let Some(change) = minimal_change(&tgt_content, &new_tgt_content) {
            edits.push((tgt_file, vec![change]));
        }

        let params = json!({
            "src_module": src_module.qualified_name, "tgt_module": tgt_module.qualified_name,
            "fn": fn_name, "arity": arity,
        });
        self.commit_refactor("move-function", params, edits).await
    }

    pub async fn convert_visibility(
        &self,
        module: ModuleId,
        fn_name: &str,
        arity: u16,
        target: Visibility,
        opts: VisibilityOptions,
    ) -> Result<RefactorResult> {
        let fid = FunctionId::new(module, fn_name, arity);
        let func = match self.graph.find_node(&EntityId::Function(fid.clone())) {
            Some(NodeData::Function(f)) => f,
            _ => return Err(RagexError::NotFound(format!("{fid}"))),
        };
        if func.visibility == target {
            return Err(RagexError::Invalid(format!("{fid} is already {target:?}")));
        }

        let content = self.read_file(&func.file).await?;
        let to_public = target == Visibility::Public;
        let (mut rewritten, n) = convert_def_keyword(&content, fn_name, to_public);
        if n == 0 {
            return Err(RagexError::Invalid(format!("could not locate definition for {fid}")));
        }

        if to_public && opts.add_doc {
            let mut lines: Vec<String> = rewritten.lines().map(|s| s.to_string()).collect();
            if let Some(idx) = lines
                .iter()
                .position(|l| l.trim_start().starts_with("def ") && l.contains(&format!("{fn_name}(")))
            {
                let indent_ws: String = lines[idx].chars().take_while(|c| c.is_whitespace()).collect();
                lines.insert(idx, format!("{indent_ws}@doc \"TODO: document {fn_name}/{arity}.\""));
                rewritten = lines.join("\n") + if rewritten.ends_with('\n') { "\n" } else { "" };
            }
        }

        let Some(change) = minimal_change(&content, &rewritten) else {
            return Err(RagexError::Invalid("no changes produced".into()));
        };
        let params = json!({"module": fid.module.qualified_name, "fn": fn_name, "arity": arity, "target": format!("{target:?}")});
        self.commit_refactor("convert-visibility", params, vec![(func.file.clone(), vec![change])]).await
    }

    /// Never touches call sites — arity is unchanged (§4.9 rename-parameter).
    pub async fn rename_parameter(
        &self,
        module: ModuleId,
        fn_name: &str,
        arity: u16,
        old: &str,
        new: &str,
    ) -> Result<RefactorResult> {
        let fid = FunctionId::new(module, fn_name, arity);
        let func = match self.graph.find_node(&EntityId::Function(fid.clone())) {
            Some(NodeData::Function(f)) => f,
            _ => return Err(RagexError::NotFound(format!("{fid}"))),
        };
        let content = self.read_file(&func.file).await?;
        let lines: Vec<&str> = content.lines().collect();
        let start_idx = (func.line.max(1) - 1) as usize;
        let (def_start, def_end) = function_body_span(&lines, start_idx);
        let def_line = lines.get(def_start).copied().unwrap_or("");
        let (before, params_str, after) = split_param_list(def_line, fn_name)
            .ok_or_else(|| RagexError::Invalid(format!("could not parse parameter list for {fid}")))?;

        let ident_re = Regex::new(&format!(r"\b{}\b", regex::escape(old))).expect("valid identifier regex");
        if !ident_re.is_match(params_str) {
            return Err(RagexError::Invalid(format!("{fid} has no parameter named {old}")));
        }
        let new_params = ident_re.replace_all(params_str, new.replace('$', "$$")).into_owned();
        let new_def_line = format!("{before}{new_params}{after}");

        let mut new_lines: Vec<String> = lines.iter().map(|l| l.to_string()).collect();
        new_lines[def_start] = new_def_line;
        for line in &mut new_lines[def_start + 1..def_end] {
            let (replaced, _) = replace_identifier(line, old, new);
            *line = replaced;
        }
        let new_content = new_lines.join("\n") + if content.ends_with('\n') { "\n" } else { "" };

        let Some(change) = minimal_change(&content, &new_content) else {
            return Err(RagexError::Invalid("no changes produced".into()));
        };
        let params = json!({"module": fid.module.qualified_name, "fn": fn_name, "arity": arity, "old": old, "new": new});
        self.commit_refactor("rename-parameter", params, vec![(func.file.clone(), vec![change])]).await
    }

    /// Parameter-list edits apply in the fixed order rename, remove, reorder,
    /// add (§4.9 change-signature); call-site rewriting follows the same
    /// order so added parameters receive their default at every call site.
    pub async fn change_signature(
        &self,
        module: ModuleId,
        fn_name: &str,
        old_arity: u16,
        changes: SignatureChanges,
    ) -> Result<RefactorResult> {
        let fid = FunctionId::new(module.clone(), fn_name, old_arity);
        let func = match self.graph.find_node(&EntityId::Function(fid.clone())) {
            Some(NodeData::Function(f)) => f,
            _ => return Err(RagexError::NotFound(format!("{fid}"))),
        };
        let def_content = self.read_file(&func.file).await?;
        let def_lines: Vec<&str> = def_content.lines().collect();
        let start_idx = (func.line.max(1) - 1) as usize;
        let (def_start, _) = function_body_span(&def_lines, start_idx);
        let def_line = def_lines.get(def_start).copied().unwrap_or("");
        let (before, params_str, after) = split_param_list(def_line, fn_name)
            .ok_or_else(|| RagexError::Invalid(format!("could not parse parameter list for {fid}")))?;
        let mut params = split_top_level_args(params_str);

        for (old, new) in &changes.rename_params {
            for p in params.iter_mut() {
                if p == old {
                    *p = new.clone();
                }
            }
        }
        let mut remove_positions = changes.remove_params.clone();
        remove_positions.sort_unstable_by(|a, b| b.cmp(a));
        for pos in remove_positions {
            if pos < params.len() {
                params.remove(pos);
            }
        }
        if !changes.reorder_params.is_empty() {
            let reordered: Vec<String> = changes.reorder_params.iter().filter_map(|&i| params.get(i).cloned()).collect();
            if reordered.len() == params.len() {
                params = reordered;
            }
        }
        let mut added_args: Vec<(usize, String)> = Vec::new();
        for added in &changes.add_params {
            let pos = added.position.min(params.len());
            params.insert(pos, added.name.clone());
            added_args.push((pos, added.default.clone().unwrap_or_else(|| "nil".to_string())));
        }
        let new_arity = params.len() as u16;
        let new_def_line = format!("{before}{}{after}", params.join(", "));

        let mut files = HashSet::new();
        files.insert(func.file.clone());
        for edge in self.graph.incoming(&EntityId::Function(func.id.clone()), Some(EdgeType::Calls)) {
            if let Some(NodeData::Function(caller)) = self.graph.find_node(&edge.from) {
                files.insert(caller.file);
            }
        }

        let mut edits = Vec::new();
        for file in files {
            let original = self.read_file(&file).await?;
            let mut rewritten = rewrite_call_sites_for_signature(&original, fn_name, old_arity, &changes, &added_args);
            if file == func.file {
                let mut lines: Vec<String> = rewritten.lines().map(|s| s.to_string()).collect();
                if let Some(l) = lines.get_mut(def_start) {
                    *l = new_def_line.clone();
                }
                rewritten = lines.join("\n") + if rewritten.ends_with('\n') { "\n" } else { "" };
            }
            if let Some(change) = minimal_change(&original, &rewritten) {
                edits.push((file, vec![change]));
            }
        }

        let params_json = json!({
            "module": module.qualified_name, "fn": fn_name, "old_arity": old_arity, "new_arity": new_arity,
        });
        self.commit_refactor("change-signature", params_json, edits).await
    }

    pub async fn extract_module(
        &self,
        src_module: ModuleId,
        new_module: ModuleId,
        fn_list: &[(String, u16)],
        opts: ExtractModuleOptions,
    ) -> Result<RefactorResult> {
        let src = self.find_module(&src_module).ok_or_else(|| RagexError::NotFound(format!("{src_module}")))?;
        let mut targets = Vec::new();
        for (name, arity) in fn_list {
            let fid = FunctionId::new(src_module.clone(), name.clone(), *arity);
            match self.graph.find_node(&EntityId::Function(fid.clone())) {
                Some(NodeData::Function(f)) => targets.push(f),
                _ => return Err(RagexError::NotFound(format!("{fid}"))),
            }
        }

        let src_content = self.read_file(&src.file).await?;
        let src_lines: Vec<&str> = src_content.lines().collect();

        let mut spans: Vec<(usize, usize)> = targets
            .iter()
            .map(|f| function_body_span(&src_lines, (f.line.max(1) - 1) as usize))
            .collect();
        spans.sort_by_key(|&(s, _)| s);

        let mut extracted_text = String::new();
        for &(s, e) in &spans {
            extracted_text.push_str(&src_lines[s..e].join("\n"));
            extracted_text.push('\n');
        }

        let remaining: Vec<&str> = src_lines
            .iter()
            .enumerate()
            .filter(|(i, _)| !spans.iter().any(|&(s, e)| *i >= s && *i < e))
            .map(|(_, l)| *l)
            .collect();
        let mut new_src_content = remaining.join("\n") + if src_content.ends_with('\n') { "\n" } else { "" };

        if opts.add_alias {
            let alias_line = format!("alias {}", new_module.qualified_name);
            let mut lines: Vec<String> = new_src_content.lines().map(|s| s.to_string()).collect();
            let insert_at = lines
                .iter()
                .position(|l| l.trim_start().starts_with("def ") || l.trim_start().starts_with("defp "))
                .unwrap_or(lines.len());
            lines.insert(insert_at, alias_line);
            new_src_content = lines.join("\n") + if new_src_content.ends_with('\n') { "\n" } else { "" };
        }
        for f in &targets {
            let (rewritten, _) = replace_bare_calls(
                &new_src_content,
                &f.id.name,
                &format!("{}.{}", new_module.qualified_name, f.id.name),
                None,
            );
            new_src_content = rewritten;
        }

        let tgt_file = self.resolve_or_derive_file(&new_module, &src.file);
        let tgt_exists = tokio::fs::metadata(&tgt_file).await.is_ok();
        let tgt_content = if tgt_exists { self.read_file(&tgt_file).await? } else { String::new() };
        if !tgt_exists {
            tokio::fs::write(&tgt_file, b"").await.map_err(|e| RagexError::io(tgt_file.clone(), e))?;
        }
        let sep = if tgt_content.is_empty() || tgt_content.ends_with('\n') { "" } else { "\n" };
        let new_tgt_content = format!("{tgt_content}{sep}{extracted_text}");

        let mut edits = Vec::new();
        let mut other_files = HashSet::new();
        for f in &targets {
            for edge in self.graph.incoming(&EntityId::Function(f.id.clone()), Some(EdgeType::Calls)) {
                if let Some(NodeData::Function(caller)) = self.graph.find_node(&edge.from) {
                    if caller.file != src.file {
                        other_files.insert(caller.file);
                    }
                }
            }
        }
        for file in other_files {
            let content = self.read_file(&file).await?;
            let mut rewritten = content.clone();
            for f in &targets {
                let (r, _) = replace_call_qualifier(&rewritten, &src_module.qualified_name, &new_module.qualified_name, &f.id.name);
                rewritten = r;
            }
            if let Some(change) = minimal_change(&content, &rewritten) {
                edits.push((file, vec![change]));
            }
        }

        if let Some(change) = minimal_change(&src_content, &new_src_content) {
            edits.push((src.file.clone(), vec![change]));
        }
        if let Some(change) = minimal_change(&tgt_content, &new_tgt_content) {
            edits.push((tgt_file, vec![change]));
        }

        let params = json!({
            "src_module": src_module.qualified_name, "new_module": new_module.qualified_name,
            "functions": fn_list.iter().map(|(n, a)| format!("{n}/{a}")).collect::<Vec<_>>(),
        });
        self.commit_refactor("extract-module", params, edits).await
    }

    pub async fn modify_attributes(&self, path: &str, changes: AttributeChanges) -> Result<RefactorResult> {
        let content = self.read_file(path).await?;
        let new_content = transform_attributes(&content, &changes.add, &changes.remove, &changes.update);
        let Some(change) = minimal_change(&content, &new_content) else {
            return Err(RagexError::Invalid("no attribute changes produced".into()));
        };
        let params = json!({"path": path, "add": changes.add, "remove": changes.remove, "update": changes.update});
        self.commit_refactor("modify-attributes", params, vec![(path.to_string(), vec![change])]).await
    }
}

/// Best-effort identifier extraction from a raw parameter-list entry, e.g.
/// `"x \\ 1"` -> `"x"`. Used to exclude a source function's own parameters
/// from extract-function's free-variable computation.
fn param_base_name(raw: &str) -> String {
    let without_default = raw.split("\\\\").next().unwrap_or(raw).trim();
    let ident_re = Regex::new(r"[A-Za-z_][A-Za-z0-9_]*").expect("valid regex");
    ident_re.find(without_default).map(|m| m.as_str().to_string()).unwrap_or_default()
}

/// `(variables_used_in_range) - (source_fn_parameters) - (locally_defined_in_range)`,
/// sorted lexicographically for determinism (§4.9 extract-function).
fn extract_free_variables(body: &str, params: &[String]) -> Vec<String> {
    const KEYWORDS: &[&str] = &[
        "do", "end", "if", "else", "case", "cond", "fn", "true", "false", "nil", "when",
        "rescue", "after", "with", "for", "import", "alias", "require", "use", "def", "defp",
        "and", "or", "not", "in", "catch", "raise", "try",
    ];
    let ident_re = Regex::new(r"\b[a-z_][a-zA-Z0-9_]*[?!]?").expect("valid regex");
    let assign_re = Regex::new(r"^\s*([a-z_][a-zA-Z0-9_]*)\s*=[^=]").expect("valid regex");

    let mut locally_defined: HashSet<String> = HashSet::new();
    for line in body.lines() {
        if let Some(caps) = assign_re.captures(line) {
            locally_defined.insert(caps[1].to_string());
        }
    }

    let mut used: BTreeSet<String> = BTreeSet::new();
    for m in ident_re.find_iter(body) {
        let word = m.as_str().trim_end_matches(['?', '!']);
        if KEYWORDS.contains(&word) || params.iter().any(|p| p == word) || locally_defined.contains(word) {
            continue;
        }
        if body[m.end()..].trim_start().starts_with('(') {
            continue; // function call, not a variable reference
        }
        used.insert(word.to_string());
    }
    used.into_iter().collect()
}

/// Single-line-preserving call inlining: matches each call of the exact
/// arity (skipping `def`/`defp` header lines), substitutes its arguments for
/// `fn_name`'s parameters into the flattened function body, and splices the
/// result back in place of the call. Multi-line bodies are joined with `; `
/// so the replacement never shifts surrounding line numbers — the same
/// naive-rendering limitation the rest of this crate's rewrite layer
/// documents (§9).
fn inline_calls(content: &str, fn_name: &str, arity: u16, params: &[String], body: &str) -> String {
    let call_re = Regex::new(&format!(r"\b{}\s*\(", regex::escape(fn_name))).expect("valid call regex");
    let flat_body: String = body
        .lines()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("; ");
    let ends_nl = content.ends_with('\n');

    let out_lines: Vec<String> = content
        .lines()
        .map(|line| {
            let trimmed = line.trim_start();
            if trimmed.starts_with("def ") || trimmed.starts_with("defp ") {
                return line.to_string();
            }
            let mut result = String::new();
            let mut last = 0usize;
            for m in call_re.find_iter(line) {
                let open_idx = m.end() - 1;
                let Some((close_idx, arg_count)) = balanced_arg_count(line, open_idx) else {
                    continue;
                };
                if arg_count != arity as usize {
                    continue;
                }
                let args = split_top_level_args(&line[open_idx + 1..close_idx]);
                let mut substituted = flat_body.clone();
                for (p, a) in params.iter().zip(args.iter()) {
                    let re = Regex::new(&format!(r"\b{}\b", regex::escape(p))).expect("valid regex");
                    substituted = re.replace_all(&substituted, a.replace('$', "$$")).into_owned();
                }
                result.push_str(&line[last..m.start()]);
                result.push('(');
                result.push_str(&substituted);
                result.push(')');
                last = close_idx + 1;
            }
            result.push_str(&line[last..]);
            result
        })
        .collect();
    out_lines.join("\n") + if ends_nl { "\n" } else { "" }
}

/// Rewrites call sites for `change-signature`, applying remove/reorder/add in
/// the same fixed order as the definition edit. Qualified calls are left
/// alone — the naive renderer has no reliable way to tell a qualified call
/// to this function apart from one to a same-named function elsewhere.
fn rewrite_call_sites_for_signature(
    content: &str,
    fn_name: &str,
    old_arity: u16,
    changes: &SignatureChanges,
    added_args: &[(usize, String)],
) -> String {
    let call_re = Regex::new(&format!(r"\b{}\s*\(", regex::escape(fn_name))).expect("valid call regex");
    let ends_nl = content.ends_with('\n');

    let out_lines: Vec<String> = content
        .lines()
        .map(|line| {
            let trimmed = line.trim_start();
            if trimmed.starts_with("def ") || trimmed.starts_with("defp ") {
                return line.to_string();
            }
            let mut result = String::new();
            let mut last = 0usize;
            for m in call_re.find_iter(line) {
                if m.start() > 0 && line.as_bytes()[m.start() - 1] == b'.' {
                    continue;
                }
                let open_idx = m.end() - 1;
                let Some((close_idx, arg_count)) = balanced_arg_count(line, open_idx) else {
                    continue;
                };
                if arg_count != old_arity as usize {
                    continue;
                }
                let mut args = split_top_level_args(&line[open_idx + 1..close_idx]);
                let mut remove_positions = changes.remove_params.clone();
                remove_positions.sort_unstable_by(|a, b| b.cmp(a));
                for pos in remove_positions {
                    if pos < args.len() {
                        args.remove(pos);
                    }
                }
                if !changes.reorder_params.is_empty() {
                    let reordered: Vec<String> = changes.reorder_params.iter().filter_map(|&i| args.get(i).cloned()).collect();
                    if reordered.len() == args.len() {
                        args = reordered;
                    }
                }
                for (pos, default) in added_args {
                    let pos = (*pos).min(args.len());
                    args.insert(pos, default.clone());
                }
                result.push_str(&line[last..m.start()]);
                result.push_str(fn_name);
                result.push('(');
                result.push_str(&args.join(", "));
                result.push(')');
                last = close_idx + 1;
            }
            result.push_str(&line[last..]);
            result
        })
        .collect();
    out_lines.join("\n") + if ends_nl { "\n" } else { "" }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ragex_core::{ModuleKind, Visibility as Vis};
    use ragex_graph::EdgeType as ET;
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn module_id(name: &str) -> ModuleId {
        ModuleId::new(Language::Elixir, name)
    }

    fn add_function(graph: &GraphStore, module: &ModuleId, name: &str, arity: u16, file: &str, line: u32, vis: Vis) -> FunctionId {
        let id = FunctionId::new(module.clone(), name, arity);
        graph.add_node(NodeData::Function(Function {
            id: id.clone(),
            file: file.to_string(),
            line,
            doc: None,
            visibility: vis,
            metadata: HashMap::new(),
        }));
        id
    }

    fn add_module(graph: &GraphStore, module: &ModuleId, file: &str) {
        graph.add_node(NodeData::Module(Module {
            id: module.clone(),
            name: module.qualified_name.clone(),
            file: file.to_string(),
            line: 1,
            doc: None,
            kind: ModuleKind::Module,
        }));
    }

    fn engine(dir: &std::path::Path, graph: Arc<GraphStore>) -> RefactorEngine {
        let editor = Arc::new(Editor::new(dir.join("backups"), None, None));
        let undo = Arc::new(UndoHistory::new(dir.join("undo"), 10 * 1024 * 1024));
        RefactorEngine::new(graph, editor, undo)
    }

    #[tokio::test]
    async fn rename_function_rewrites_definition_and_callers() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a.ex");
        let b = dir.path().join("b.ex");
        tokio::fs::write(&a, "defmodule M do\n  def foo(x) do\n    x + 1\n  end\nend\n").await.unwrap();
        tokio::fs::write(&b, "defmodule N do\n  def run do\n    M.foo(1)\n  end\nend\n").await.unwrap();

        let graph = Arc::new(GraphStore::new());
        let m = module_id("M");
        let foo = add_function(&graph, &m, "foo", 1, a.to_str().unwrap(), 2, Vis::Public);
        let run = add_function(&graph, &module_id("N"), "run", 0, b.to_str().unwrap(), 2, Vis::Public);
        graph.add_edge(EntityId::Function(run), EntityId::Function(foo), ET::Calls);

        let eng = engine(dir.path(), graph);
        let result = eng
            .rename_function(m.clone(), "foo", "baz", Some(1), Scope::Project)
            .await
            .unwrap();
        assert_eq!(result.files_changed.len(), 2);

        let a_content = tokio::fs::read_to_string(&a).await.unwrap();
        let b_content = tokio::fs::read_to_string(&b).await.unwrap();
        assert!(a_content.contains("def baz(x)"));
        assert!(!a_content.contains("def foo"));
        assert!(b_content.contains("M.baz(1)"));
    }

    #[tokio::test]
    async fn rename_function_with_module_scope_ignores_other_files() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a.ex");
        let b = dir.path().join("b.ex");
        tokio::fs::write(&a, "defmodule M do\n  def foo(x) do\n    x\n  end\nend\n").await.unwrap();
        tokio::fs::write(&b, "defmodule N do\n  def run do\n    M.foo(1)\n  end\nend\n").await.unwrap();

        let graph = Arc::new(GraphStore::new());
        let m = module_id("M");
        let foo = add_function(&graph, &m, "foo", 1, a.to_str().unwrap(), 2, Vis::Public);
        let run = add_function(&graph, &module_id("N"), "run", 0, b.to_str().unwrap(), 2, Vis::Public);
        graph.add_edge(EntityId::Function(run), EntityId::Function(foo), ET::Calls);

        let eng = engine(dir.path(), graph);
        let result = eng.rename_function(m, "foo", "baz", Some(1), Scope::Module).await.unwrap();
        assert_eq!(result.files_changed, vec![a.to_str().unwrap().to_string()]);
        let b_content = tokio::fs::read_to_string(&b).await.unwrap();
        assert!(b_content.contains("M.foo(1)"));
    }

    #[tokio::test]
    async fn extract_function_creates_new_function_and_call() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a.ex");
        tokio::fs::write(
            &a,
            "defmodule M do\n  def foo(x) do\n    y = x + 1\n    y * 2\n  end\nend\n",
        )
        .await
        .unwrap();

        let graph = Arc::new(GraphStore::new());
        let m = module_id("M");
        add_function(&graph, &m, "foo", 1, a.to_str().unwrap(), 2, Vis::Public);

        let eng = engine(dir.path(), graph);
        eng.extract_function(m, "foo", 1, "double", (3, 3), ExtractOptions::default())
            .await
            .unwrap();

        let content = tokio::fs::read_to_string(&a).await.unwrap();
        assert!(content.contains("double(y)"));
        assert!(content.contains("defp double(y) do"));
    }

    #[tokio::test]
    async fn convert_visibility_flips_keyword() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a.ex");
        tokio::fs::write(&a, "defmodule M do\n  defp foo(x) do\n    x\n  end\nend\n").await.unwrap();

        let graph = Arc::new(GraphStore::new());
        let m = module_id("M");
        add_function(&graph, &m, "foo", 1, a.to_str().unwrap(), 2, Vis::Private);

        let eng = engine(dir.path(), graph);
        eng.convert_visibility(m, "foo", 1, Vis::Public, VisibilityOptions::default())
            .await
            .unwrap();

        let content = tokio::fs::read_to_string(&a).await.unwrap();
        assert!(content.contains("def foo(x)"));
        assert!(!content.contains("defp foo"));
    }

    #[tokio::test]
    async fn rename_parameter_leaves_call_sites_untouched() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a.ex");
        let b = dir.path().join("b.ex");
        tokio::fs::write(&a, "defmodule M do\n  def foo(x) do\n    x + 1\n  end\nend\n").await.unwrap();
        tokio::fs::write(&b, "defmodule N do\n  def run do\n    M.foo(1)\n  end\nend\n").await.unwrap();

        let graph = Arc::new(GraphStore::new());
        let m = module_id("M");
        add_function(&graph, &m, "foo", 1, a.to_str().unwrap(), 2, Vis::Public);

        let eng = engine(dir.path(), graph);
        eng.rename_parameter(m, "foo", 1, "x", "n").await.unwrap();

        let a_content = tokio::fs::read_to_string(&a).await.unwrap();
        let b_content = tokio::fs::read_to_string(&b).await.unwrap();
        assert!(a_content.contains("def foo(n)"));
        assert!(a_content.contains("n + 1"));
        assert!(b_content.contains("M.foo(1)"));
    }

    #[tokio::test]
    async fn change_signature_removes_parameter_everywhere() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a.ex");
        let b = dir.path().join("b.ex");
        tokio::fs::write(&a, "defmodule M do\n  def foo(x, y) do\n    x + y\n  end\nend\n").await.unwrap();
        tokio::fs::write(&b, "defmodule N do\n  def run do\n    foo(1, 2)\n  end\nend\n").await.unwrap();

        let graph = Arc::new(GraphStore::new());
        let m = module_id("M");
        let foo = add_function(&graph, &m, "foo", 2, a.to_str().unwrap(), 2, Vis::Public);
        let run = add_function(&graph, &module_id("N"), "run", 0, b.to_str().unwrap(), 2, Vis::Public);
        graph.add_edge(EntityId::Function(run), EntityId::Function(foo), ET::Calls);

        let eng = engine(dir.path(), graph);
        let mut changes = SignatureChanges::default();
        changes.remove_params = vec![1];
        eng.change_signature(m, "foo", 2, changes).await.unwrap();

        let a_content = tokio::fs::read_to_string(&a).await.unwrap();
        let b_content = tokio::fs::read_to_string(&b).await.unwrap();
        assert!(a_content.contains("def foo(x)"));
        assert!(b_content.contains("foo(1)"));
    }

    #[tokio::test]
    async fn modify_attributes_adds_and_removes() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a.ex");
        tokio::fs::write(&a, "defmodule M do\n  @behaviour Foo\n\n  def foo, do: :ok\nend\n").await.unwrap();

        let graph = Arc::new(GraphStore::new());
        let eng = engine(dir.path(), graph);
        let changes = AttributeChanges {
            add: vec![("moduledoc".to_string(), "\"hi\"".to_string())],
            remove: vec!["behaviour".to_string()],
            update: vec![],
        };
        eng.modify_attributes(a.to_str().unwrap(), changes).await.unwrap();

        let content = tokio::fs::read_to_string(&a).await.unwrap();
        assert!(content.contains("@moduledoc \"hi\""));
        assert!(!content.contains("@behaviour"));
    }

    #[tokio::test]
    async fn inline_function_substitutes_and_removes_definition() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a.ex");
        let b = dir.path().join("b.ex");
        tokio::fs::write(&a, "defmodule M do\n  def foo(x) do\n    x + 1\n  end\nend\n").await.unwrap();
        tokio::fs::write(&b, "defmodule N do\n  def run do\n    foo(5)\n  end\nend\n").await.unwrap();

        let graph = Arc::new(GraphStore::new());
        let m = module_id("M");
        let foo = add_function(&graph, &m, "foo", 1, a.to_str().unwrap(), 2, Vis::Public);
        let run = add_function(&graph, &module_id("N"), "run", 0, b.to_str().unwrap(), 2, Vis::Public);
        graph.add_edge(EntityId::Function(run), EntityId::Function(foo), ET::Calls);

        let eng = engine(dir.path(), graph);
        eng.inline_function(m, "foo", 1).await.unwrap();

        let a_content = tokio::fs::read_to_string(&a).await.unwrap();
        let b_content = tokio::fs::read_to_string(&b).await.unwrap();
        assert!(!a_content.contains("def foo"));
        assert!(b_content.contains("(5 + 1)"));
    }

    #[tokio::test]
    async fn move_function_creates_target_and_rewrites_callers() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a.ex");
        let c = dir.path().join("c.ex");
        let tgt = dir.path().join("n.ex");
        tokio::fs::write(&a, "defmodule M do\n  def foo(x) do\n    x\n  end\nend\n").await.unwrap();
        tokio::fs::write(&c, "defmodule O do\n  def run do\n    M.foo(1)\n  end\nend\n").await.unwrap();

        let graph = Arc::new(GraphStore::new());
        let m = module_id("M");
        let n = module_id("N");
        add_module(&graph, &n, tgt.to_str().unwrap());
        let foo = add_function(&graph, &m, "foo", 1, a.to_str().unwrap(), 2, Vis::Public);
        let run = add_function(&graph, &module_id("O"), "run", 0, c.to_str().unwrap(), 2, Vis::Public);
        graph.add_edge(EntityId::Function(run), EntityId::Function(foo), ET::Calls);

        let eng = engine(dir.path(), graph);
        eng.move_function(m, n, "foo", 1, MoveOptions::default()).await.unwrap();

        let a_content = tokio::fs::read_to_string(&a).await.unwrap();
        let tgt_content = tokio::fs::read_to_string(&tgt).await.unwrap();
        let c_content = tokio::fs::read_to_string(&c).await.unwrap();
        assert!(!a_content.contains("def foo"));
        assert!(tgt_content.contains("def foo(x)"));
        assert!(c_content.contains("N.foo(1)"));
    }
}
