use ragex_core::Change;
use regex::Regex;

/// Identifier-aware text substitution helpers (§9 "the rewrite itself is a
/// set of line-range Change records computed by identifier-aware text
/// substitution"). None of these parse an AST; they rely on word-boundary
/// regexes, which is the naive-rendering limitation the design notes
/// explicitly inherit from the source system.

pub fn replace_identifier(content: &str, old: &str, new: &str) -> (String, usize) {
    let re = Regex::new(&format!(r"\b{}\b", regex::escape(old))).expect("valid identifier regex");
    let count = re.find_iter(content).count();
    (re.replace_all(content, new.replace('$', "$$")).into_owned(), count)
}

pub fn replace_qualified_call(content: &str, module: &str, old: &str, new: &str) -> (String, usize) {
    let re = Regex::new(&format!(r"\b{}\.{}\b", regex::escape(module), regex::escape(old)))
        .expect("valid qualified-call regex");
    let replacement = format!("{}.{}", module, new).replace('$', "$$");
    let count = re.find_iter(content).count();
    (re.replace_all(content, replacement).into_owned(), count)
}

/// Rewrites `OldSeg.Rest` -> `NewSeg.Rest` only where `old_segment` appears
/// as a whole dotted segment, not a substring of a longer segment (§4.9
/// rename-module "segment-equal, not substring").
pub fn replace_module_segment(content: &str, old_segment: &str, new_segment: &str) -> (String, usize) {
    let re = Regex::new(&format!(
        r"(?P<pre>^|[^A-Za-z0-9_.]){}(?P<post>$|[^A-Za-z0-9_])",
        regex::escape(old_segment)
    ))
    .expect("valid module-segment regex");
    let mut count = 0;
    let replaced = re
        .replace_all(content, |caps: &regex::Captures| {
            count += 1;
            format!("{}{}{}", &caps["pre"], new_segment, &caps["post"])
        })
        .into_owned();
    (replaced, count)
}

pub fn replace_function_reference(content: &str, old: &str, new: &str, arity: Option<u16>) -> (String, usize) {
    let pattern = match arity {
        Some(a) => format!(r"&{}/{}\b", regex::escape(old), a),
        None => format!(r"&{}/(\d+)", regex::escape(old)),
    };
    let re = Regex::new(&pattern).expect("valid function-reference regex");
    let count = re.find_iter(content).count();
    let replaced = match arity {
        Some(a) => re.replace_all(content, format!("&{}/{}", new, a)).into_owned(),
        None => re.replace_all(content, format!("&{}/$1", new)).into_owned(),
    };
    (replaced, count)
}

pub fn replace_definition_name(content: &str, old: &str, new: &str) -> (String, usize) {
    let re = Regex::new(&format!(r"\b(defp?)(\s+){}\b", regex::escape(old))).expect("valid def regex");
    let count = re.find_iter(content).count();
    let replaced = re.replace_all(content, format!("$1$2{}", new)).into_owned();
    (replaced, count)
}

/// Flips the `def`/`defp` keyword immediately preceding `name`.
pub fn convert_def_keyword(content: &str, name: &str, to_public: bool) -> (String, usize) {
    let (from_kw, to_kw) = if to_public { ("defp", "def") } else { ("def", "defp") };
    let re = Regex::new(&format!(r"\b{}(\s+){}\b", from_kw, regex::escape(name))).expect("valid visibility regex");
    let count = re.find_iter(content).count();
    let replaced = re.replace_all(content, format!("{}$1{}", to_kw, name)).into_owned();
    (replaced, count)
}

/// Heuristic function-body span: from the 0-based `start_line` (the
/// definition line) up to (but excluding) the next top-level `def`/`defp`
/// line, or end of file. There is no real parser behind this crate (§9), so
/// this is the best available proxy for "this function's lines".
pub fn function_body_span(lines: &[&str], start_line: usize) -> (usize, usize) {
    let mut end = lines.len();
    for (i, line) in lines.iter().enumerate().skip(start_line + 1) {
        let trimmed = line.trim_start();
        if trimmed.starts_with("def ") || trimmed.starts_with("defp ") {
            end = i;
            break;
        }
    }
    (start_line, end)
}

/// Applies `replace_definition_name` only to the given 1-based line numbers,
/// leaving every other line (including same-named definitions at a
/// different arity) untouched. Used by operators that already know exactly
/// which line a definition lives on from the graph.
pub fn rename_def_lines(content: &str, lines_to_edit: &[u32], old: &str, new: &str) -> String {
    let ends_nl = content.ends_with('\n');
    let mut lines: Vec<String> = content.lines().map(|s| s.to_string()).collect();
    for &line in lines_to_edit {
        let idx = (line as usize).saturating_sub(1);
        if let Some(l) = lines.get_mut(idx) {
            let (new_line, _) = replace_definition_name(l, old, new);
            *l = new_line;
        }
    }
    lines.join("\n") + if ends_nl { "\n" } else { "" }
}

/// Scans forward from `open_idx` (the index of an opening `(`) for its
/// matching close paren, tracking depth, and returns `(close_idx,
/// arg_count)` where `arg_count` is the number of top-level comma-separated
/// arguments (0 for empty parens). Returns `None` if unbalanced within the
/// line (e.g. a call whose argument list spans multiple lines), in which
/// case the caller leaves that occurrence untouched.
pub fn balanced_arg_count(s: &str, open_idx: usize) -> Option<(usize, usize)> {
    let bytes = s.as_bytes();
    if bytes.get(open_idx) != Some(&b'(') {
        return None;
    }
    let mut depth = 0i32;
    let mut arg_count = 0usize;
    let mut seen_token = false;
    let mut i = open_idx;
    while i < bytes.len() {
        match bytes[i] {
            b'(' | b'[' | b'{' => depth += 1,
            b')' | b']' | b'}' => {
                depth -= 1;
                if depth == 0 {
                    if seen_token {
                        arg_count += 1;
                    }
                    return Some((i, arg_count));
                }
            }
            b',' if depth == 1 => {
                arg_count += 1;
                seen_token = false;
            }
            c if !c.is_ascii_whitespace() => seen_token = true,
            _ => {}
        }
        i += 1;
    }
    None
}

/// Splits the inside of a balanced argument list (no surrounding parens) on
/// top-level commas, trimming whitespace from each piece. Used to rewrite
/// call-site argument lists for `change-signature`.
pub fn split_top_level_args(args: &str) -> Vec<String> {
    if args.trim().is_empty() {
        return vec![];
    }
    let mut depth = 0i32;
    let mut pieces = vec![String::new()];
    for c in args.chars() {
        match c {
            '(' | '[' | '{' => {
                depth += 1;
                pieces.last_mut().unwrap().push(c);
            }
            ')' | ']' | '}' => {
                depth -= 1;
                pieces.last_mut().unwrap().push(c);
            }
            ',' if depth == 0 => pieces.push(String::new()),
            _ => pieces.last_mut().unwrap().push(c),
        }
    }
    pieces.into_iter().map(|p| p.trim().to_string()).collect()
}

/// Rewrites bare calls `old(args)` -> `new(args)`, skipping `def`/`defp`
/// header lines (handled separately via [`rename_def_lines`]) and
/// occurrences immediately preceded by a `.` (qualified calls, handled by
/// [`replace_qualified_calls`]). When `arity` is given, only calls whose
/// top-level argument count matches are rewritten.
pub fn replace_bare_calls(content: &str, old: &str, new: &str, arity: Option<u16>) -> (String, usize) {
    let call_re = Regex::new(&format!(r"\b{}\s*\(", regex::escape(old))).expect("valid call regex");
    let mut count = 0;
    let ends_nl = content.ends_with('\n');
    let mut out_lines = Vec::new();
    for line in content.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("def ") || trimmed.starts_with("defp ") {
            out_lines.push(line.to_string());
            continue;
        }
        out_lines.push(rewrite_calls_in_line(line, &call_re, new, arity, true, &mut count));
    }
    (out_lines.join("\n") + if ends_nl { "\n" } else { "" }, count)
}

/// Rewrites qualified calls `qualifier.old(args)` -> `qualifier.new(args)`,
/// with the same per-call arity filter as [`replace_bare_calls`].
pub fn replace_qualified_calls(
    content: &str,
    qualifier: &str,
    old: &str,
    new: &str,
    arity: Option<u16>,
) -> (String, usize) {
    let call_re = Regex::new(&format!(
        r"\b{}\.{}\s*\(",
        regex::escape(qualifier),
        regex::escape(old)
    ))
    .expect("valid qualified call regex");
    let mut count = 0;
    let ends_nl = content.ends_with('\n');
    let replacement = format!("{}.{}", qualifier, new);
    let out_lines: Vec<String> = content
        .lines()
        .map(|line| rewrite_calls_in_line(line, &call_re, &replacement, arity, false, &mut count))
        .collect();
    (out_lines.join("\n") + if ends_nl { "\n" } else { "" }, count)
}

fn rewrite_calls_in_line(
    line: &str,
    call_re: &Regex,
    replacement_prefix: &str,
    arity: Option<u16>,
    skip_if_preceded_by_dot: bool,
    count: &mut usize,
) -> String {
    let mut result = String::new();
    let mut last = 0usize;
    for m in call_re.find_iter(line) {
        if skip_if_preceded_by_dot && m.start() > 0 && line.as_bytes()[m.start() - 1] == b'.' {
            continue;
        }
        let open_paren_idx = m.end() - 1;
        let Some((_close_idx, arg_count)) = balanced_arg_count(line, open_paren_idx) else {
            continue;
        };
        if arity.map_or(true, |a| a as usize == arg_count) {
            result.push_str(&line[last..m.start()]);
            result.push_str(replacement_prefix);
            result.push('(');
            last = open_paren_idx + 1;
            *count += 1;
        }
    }
    result.push_str(&line[last..]);
    result
}

/// Rewrites `qualifier.fn_name(` -> `new_qualifier.fn_name(` wherever the
/// qualifier appears as the module prefix of a call to `fn_name` (§4.9
/// `move-function` "rewrites every qualified call `SrcModule.fn(...)` ->
/// `TgtModule.fn(...)`").
pub fn replace_call_qualifier(content: &str, old_qualifier: &str, new_qualifier: &str, fn_name: &str) -> (String, usize) {
    let re = Regex::new(&format!(
        r"\b{}\.({}\s*\()",
        regex::escape(old_qualifier),
        regex::escape(fn_name)
    ))
    .expect("valid call-qualifier regex");
    let count = re.find_iter(content).count();
    let replaced = re
        .replace_all(content, format!("{}.$1", new_qualifier.replace('$', "$$")))
        .into_owned();
    (replaced, count)
}

/// Computes the smallest `Change` that turns `old` into `new`, by trimming
/// identical line prefixes and suffixes. Returns `None` if the two strings
/// have identical lines. A pure growth in line count becomes an `Insert`; a
/// pure shrink becomes a `Delete`; anything else is a `Replace` (§4.7).
pub fn minimal_change(old: &str, new: &str) -> Option<Change> {
    if old == new {
        return None;
    }
    let old_lines: Vec<&str> = old.lines().collect();
    let new_lines: Vec<&str> = new.lines().collect();

    let mut start = 0usize;
    while start < old_lines.len() && start < new_lines.len() && old_lines[start] == new_lines[start] {
        start += 1;
    }

    let mut old_end = old_lines.len();
    let mut new_end = new_lines.len();
    while old_end > start && new_end > start && old_lines[old_end - 1] == new_lines[new_end - 1] {
        old_end -= 1;
        new_end -= 1;
    }

    if old_end <= start && new_end <= start {
        return None;
    }
    if old_end <= start {
        return Some(Change::Insert {
            line_start: (start + 1) as u32,
            content: new_lines[start..new_end].join("\n"),
        });
    }
    if new_end <= start {
        return Some(Change::Delete {
            line_start: (start + 1) as u32,
            line_end: old_end as u32,
        });
    }
    Some(Change::Replace {
        line_start: (start + 1) as u32,
        line_end: old_end as u32,
        content: new_lines[start..new_end].join("\n"),
    })
}

/// Converts `CamelCase`/`PascalCase` to `snake_case`, for deriving a
/// plausible target file name from a module's last path segment (§4.9
/// `move-function`/`extract-module`).
pub fn to_snake_case(name: &str) -> String {
    let mut out = String::new();
    for (i, c) in name.chars().enumerate() {
        if c.is_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

/// Indents every non-empty line of `text` by `spaces` spaces.
pub fn indent(text: &str, spaces: usize) -> String {
    let pad = " ".repeat(spaces);
    text.lines()
        .map(|l| if l.is_empty() { l.to_string() } else { format!("{pad}{l}") })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Finds the parenthesized parameter list immediately following
/// `fn_name` on `line` and returns `(before, params_str, after)` so a
/// caller can rebuild the line with a different parameter list.
pub fn split_param_list<'a>(line: &'a str, fn_name: &str) -> Option<(&'a str, &'a str, &'a str)> {
    let re = Regex::new(&format!(r"\b{}\s*\(", regex::escape(fn_name))).ok()?;
    let m = re.find(line)?;
    let open_idx = m.end() - 1;
    let (close_idx, _) = balanced_arg_count(line, open_idx)?;
    Some((&line[..open_idx + 1], &line[open_idx + 1..close_idx], &line[close_idx..]))
}

/// Applies `modify-attributes`'s add/remove/update in that order directly on
/// file content (§4.9: "operates on `content`, not a module/function
/// lookup"). New attributes are inserted before the first existing `@name`
/// line (or before the first `def`/`defp` if there are none); removals drop
/// the whole line, collapsing the gap; updates rewrite the value in place.
pub fn transform_attributes(
    content: &str,
    add: &[(String, String)],
    remove: &[String],
    update: &[(String, String)],
) -> String {
    let ends_nl = content.ends_with('\n');
    let mut lines: Vec<String> = content.lines().map(|s| s.to_string()).collect();

    for (name, value) in update {
        let re = Regex::new(&format!(r"^(\s*)@{}\s+.*$", regex::escape(name))).expect("valid attribute regex");
        for line in lines.iter_mut() {
            if let Some(caps) = re.captures(line) {
                *line = format!("{}@{} {}", &caps[1], name, value);
            }
        }
    }

    if !remove.is_empty() {
        let remove_res: Vec<Regex> = remove
            .iter()
            .map(|name| Regex::new(&format!(r"^\s*@{}\b", regex::escape(name))).expect("valid attribute regex"))
            .collect();
        lines.retain(|line| !remove_res.iter().any(|re| re.is_match(line)));
    }

    if !add.is_empty() {
        let attr_re = Regex::new(r"^\s*@[A-Za-z_]").expect("valid attribute regex");
        let insert_at = lines
            .iter()
            .position(|l| attr_re.is_match(l))
            .or_else(|| {
                lines
                    .iter()
                    .position(|l| l.trim_start().starts_with("def ") || l.trim_start().starts_with("defp "))
            })
            .unwrap_or(lines.len());
        for (i, (name, value)) in add.iter().enumerate() {
            lines.insert(insert_at + i, format!("@{name} {value}"));
        }
    }

    lines.join("\n") + if ends_nl { "\n" } else { "" }
}
