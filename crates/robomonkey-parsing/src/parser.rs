//! Line-oriented symbol extraction
//!
//! Extraction is deliberately heuristic: definitions are recognized by
//! line patterns, bodies by indentation (Python) or brace matching
//! (Rust/JS/TS/Go), and call sites by identifier-before-paren scanning.
//! The FQN scheme is `<module path from relative_path>.<enclosing>.<name>`
//! which is stable across re-indexing of identical content.

use regex::Regex;

use crate::error::ParseResult;
use crate::languages::config_for_language;
use crate::types::{ParsedCall, ParsedFile, ParsedImport, ParsedInherit, ParsedSymbol};
use robomonkey_store::SymbolKind;

/// Parser façade contract: best-effort structured facts for one file
pub trait SourceParser: Send + Sync {
    /// Parse `content` as `language`. Unsupported languages return an
    /// empty [`ParsedFile`], never an error.
    fn parse(&self, language: &str, relative_path: &str, content: &str) -> ParseResult<ParsedFile>;
}

/// Keywords that look like calls but are control flow, per language family
fn call_keywords(language: &str) -> &'static [&'static str] {
    match language {
        "python" => &[
            "if", "elif", "while", "for", "return", "yield", "assert", "del", "not", "and", "or",
            "lambda", "with", "raise", "except", "def", "class", "in", "is", "print",
        ],
        "rust" => &[
            "if", "match", "while", "for", "loop", "return", "fn", "impl", "where", "move", "Some",
            "Ok", "Err", "None", "Box", "Vec",
        ],
        "javascript" | "typescript" => &[
            "if", "switch", "while", "for", "return", "function", "catch", "typeof", "new",
            "await", "constructor", "super",
        ],
        "go" => &[
            "if", "switch", "for", "return", "func", "go", "defer", "select", "range", "make",
            "new", "len", "cap", "append",
        ],
        _ => &[],
    }
}

/// Derive the module path component of FQNs from a relative path:
/// `src/utils/helpers.py` -> `src.utils.helpers`
pub fn module_path(relative_path: &str) -> String {
    let without_ext = relative_path
        .rsplit_once('.')
        .map_or(relative_path, |(stem, _)| stem);
    without_ext.replace(['/', '\\'], ".")
}

struct Matchers {
    py_def: Regex,
    py_class: Regex,
    py_import: Regex,
    py_from_import: Regex,
    rs_fn: Regex,
    rs_type: Regex,
    rs_trait: Regex,
    rs_impl: Regex,
    rs_use: Regex,
    js_function: Regex,
    js_arrow: Regex,
    js_class: Regex,
    js_interface: Regex,
    js_method: Regex,
    js_import: Regex,
    js_require: Regex,
    go_func: Regex,
    go_type: Regex,
    go_import: Regex,
    call_site: Regex,
}

impl Matchers {
    fn new() -> Self {
        // The patterns are static and known-good; failure here is a
        // programming error, not an input error.
        Self {
            py_def: Regex::new(r"^(\s*)(?:async\s+)?def\s+(\w+)\s*\(").expect("py_def pattern"),
            py_class: Regex::new(r"^(\s*)class\s+(\w+)\s*(?:\(([^)]*)\))?\s*:")
                .expect("py_class pattern"),
            py_import: Regex::new(r"^import\s+([\w.]+)").expect("py_import pattern"),
            py_from_import: Regex::new(r"^from\s+([\w.]+)\s+import\s+(.+)")
                .expect("py_from_import pattern"),
            rs_fn: Regex::new(
                r#"^(\s*)(?:pub(?:\([^)]*\))?\s+)?(?:const\s+)?(?:async\s+)?(?:unsafe\s+)?(?:extern\s+"[^"]*"\s+)?fn\s+(\w+)"#,
            )
            .expect("rs_fn pattern"),
            rs_type: Regex::new(r"^(\s*)(?:pub(?:\([^)]*\))?\s+)?(?:struct|enum)\s+(\w+)")
                .expect("rs_type pattern"),
            rs_trait: Regex::new(r"^(\s*)(?:pub(?:\([^)]*\))?\s+)?trait\s+(\w+)")
                .expect("rs_trait pattern"),
            rs_impl: Regex::new(
                r"^\s*impl(?:<[^>]*>)?\s+(?:([A-Za-z_]\w*)(?:<[^>]*>)?\s+for\s+)?([A-Za-z_]\w*)",
            )
            .expect("rs_impl pattern"),
            rs_use: Regex::new(r"^\s*use\s+([\w:]+)").expect("rs_use pattern"),
            js_function: Regex::new(
                r"^(\s*)(?:export\s+)?(?:default\s+)?(?:async\s+)?function\s*\*?\s*(\w+)\s*\(",
            )
            .expect("js_function pattern"),
            js_arrow: Regex::new(
                r"^(\s*)(?:export\s+)?(?:const|let)\s+(\w+)\s*=\s*(?:async\s*)?(?:\([^)]*\)|\w+)\s*=>",
            )
            .expect("js_arrow pattern"),
            js_class: Regex::new(
                r"^(\s*)(?:export\s+)?(?:default\s+)?(?:abstract\s+)?class\s+(\w+)(?:\s+extends\s+([\w.]+))?(?:\s+implements\s+([\w,\s.]+))?",
            )
            .expect("js_class pattern"),
            js_interface: Regex::new(r"^(\s*)(?:export\s+)?interface\s+(\w+)")
                .expect("js_interface pattern"),
            js_method: Regex::new(r"^(\s+)(?:public\s+|private\s+|protected\s+|static\s+)*(?:async\s+)?(\w+)\s*\([^)]*\)\s*(?::\s*[\w<>,\[\]\s.|]+)?\s*\{")
                .expect("js_method pattern"),
            js_import: Regex::new(r#"^\s*import\s+.*?from\s+['"]([^'"]+)['"]"#)
                .expect("js_import pattern"),
            js_require: Regex::new(r#"require\(\s*['"]([^'"]+)['"]\s*\)"#)
                .expect("js_require pattern"),
            go_func: Regex::new(r"^func\s+(?:\(\s*\w+\s+\*?(\w+)\s*\)\s+)?(\w+)\s*\(")
                .expect("go_func pattern"),
            go_type: Regex::new(r"^type\s+(\w+)\s+(struct|interface)\b").expect("go_type pattern"),
            go_import: Regex::new(r#"^\s*(?:import\s+)?"([^"]+)""#).expect("go_import pattern"),
            call_site: Regex::new(r"([A-Za-z_]\w*)\s*\(").expect("call_site pattern"),
        }
    }
}

/// The default line/regex parser
pub struct LineParser {
    matchers: Matchers,
}

impl Default for LineParser {
    fn default() -> Self {
        Self::new()
    }
}

impl LineParser {
    pub fn new() -> Self {
        Self {
            matchers: Matchers::new(),
        }
    }

    fn parse_python(&self, module: &str, content: &str) -> ParsedFile {
        let lines: Vec<&str> = content.lines().collect();
        let mut parsed = ParsedFile {
            module_doc: python_module_doc(&lines),
            ..ParsedFile::default()
        };

        // Enclosing-class stack: (indent, class name)
        let mut class_stack: Vec<(usize, String)> = Vec::new();

        for (i, line) in lines.iter().enumerate() {
            if let Some(caps) = self.matchers.py_import.captures(line) {
                parsed.imports.push(ParsedImport {
                    target: caps[1].to_string(),
                    start_line: i + 1,
                    end_line: i + 1,
                });
                continue;
            }
            if let Some(caps) = self.matchers.py_from_import.captures(line) {
                let base = caps[1].to_string();
                for name in caps[2].split(',') {
                    let name = name.trim().split_whitespace().next().unwrap_or("");
                    if name.is_empty() || name == "*" {
                        continue;
                    }
                    parsed.imports.push(ParsedImport {
                        target: format!("{base}.{name}"),
                        start_line: i + 1,
                        end_line: i + 1,
                    });
                }
                continue;
            }

            if let Some(caps) = self.matchers.py_class.captures(line) {
                let indent = caps[1].len();
                let name = caps[2].to_string();
                class_stack.retain(|(d, _)| *d < indent);

                let fqn = python_fqn(module, &class_stack, &name);
                let end_line = python_block_end(&lines, i, indent);
                let body = lines[i..end_line].join("\n");

                if let Some(bases) = caps.get(3) {
                    for base in bases.as_str().split(',') {
                        let base = base.trim().rsplit('.').next().unwrap_or("").trim();
                        if base.is_empty() || base == "object" || base.starts_with("metaclass") {
                            continue;
                        }
                        parsed.inherits.push(ParsedInherit {
                            child_fqn: fqn.clone(),
                            parent_name: base.to_string(),
                            is_implementation: false,
                            line: i + 1,
                        });
                    }
                }

                parsed.symbols.push(ParsedSymbol {
                    name: name.clone(),
                    fqn,
                    kind: SymbolKind::Class,
                    signature: Some(line.trim().to_string()),
                    docstring: python_docstring(&lines, i),
                    start_line: i + 1,
                    end_line,
                    body,
                });

                class_stack.push((indent, name));
                continue;
            }

            if let Some(caps) = self.matchers.py_def.captures(line) {
                let indent = caps[1].len();
                let name = caps[2].to_string();
                class_stack.retain(|(d, _)| *d < indent);

                let fqn = python_fqn(module, &class_stack, &name);
                let kind = if class_stack.is_empty() {
                    SymbolKind::Function
                } else {
                    SymbolKind::Method
                };
                let end_line = python_block_end(&lines, i, indent);
                let body = lines[i..end_line].join("\n");

                self.extract_calls(&mut parsed, "python", &fqn, &body, i + 1, &name);

                parsed.symbols.push(ParsedSymbol {
                    name,
                    fqn,
                    kind,
                    signature: Some(line.trim().to_string()),
                    docstring: python_docstring(&lines, i),
                    start_line: i + 1,
                    end_line,
                    body,
                });
            }
        }

        parsed
    }

    fn parse_rust(&self, module: &str, content: &str) -> ParsedFile {
        let lines: Vec<&str> = content.lines().collect();
        let mut parsed = ParsedFile {
            module_doc: leading_comment_block(&lines, "//!"),
            ..ParsedFile::default()
        };

        // Current `impl` target and the line its block ends on
        let mut impl_scope: Option<(String, usize)> = None;

        for (i, line) in lines.iter().enumerate() {
            if let Some(caps) = self.matchers.rs_use.captures(line) {
                parsed.imports.push(ParsedImport {
                    target: caps[1].replace("::", "."),
                    start_line: i + 1,
                    end_line: i + 1,
                });
                continue;
            }

            if let Some(caps) = self.matchers.rs_impl.captures(line) {
                let type_name = caps[2].to_string();
                let end = brace_block_end(&lines, i);
                if let Some(trait_name) = caps.get(1) {
                    parsed.inherits.push(ParsedInherit {
                        child_fqn: format!("{module}.{type_name}"),
                        parent_name: trait_name.as_str().to_string(),
                        is_implementation: true,
                        line: i + 1,
                    });
                }
                impl_scope = Some((type_name, end));
                continue;
            }

            if let Some((_, scope_end)) = &impl_scope
                && i + 1 > *scope_end
            {
                impl_scope = None;
            }

            if let Some(caps) = self.matchers.rs_type.captures(line) {
                let name = caps[2].to_string();
                let end_line = brace_block_end(&lines, i);
                parsed.symbols.push(ParsedSymbol {
                    name: name.clone(),
                    fqn: format!("{module}.{name}"),
                    kind: SymbolKind::Class,
                    signature: Some(line.trim().trim_end_matches('{').trim().to_string()),
                    docstring: doc_comment_above(&lines, i, "///"),
                    start_line: i + 1,
                    end_line,
                    body: lines[i..end_line].join("\n"),
                });
                continue;
            }

            if let Some(caps) = self.matchers.rs_trait.captures(line) {
                let name = caps[2].to_string();
                let end_line = brace_block_end(&lines, i);
                parsed.symbols.push(ParsedSymbol {
                    name: name.clone(),
                    fqn: format!("{module}.{name}"),
                    kind: SymbolKind::Interface,
                    signature: Some(line.trim().trim_end_matches('{').trim().to_string()),
                    docstring: doc_comment_above(&lines, i, "///"),
                    start_line: i + 1,
                    end_line,
                    body: lines[i..end_line].join("\n"),
                });
                // Required methods inside the trait block scope like impl fns
                impl_scope = Some((name, end_line));
                continue;
            }

            if let Some(caps) = self.matchers.rs_fn.captures(line) {
                let name = caps[2].to_string();
                let (fqn, kind) = match &impl_scope {
                    Some((type_name, scope_end)) if i + 1 <= *scope_end => (
                        format!("{module}.{type_name}.{name}"),
                        SymbolKind::Method,
                    ),
                    _ => (format!("{module}.{name}"), SymbolKind::Function),
                };
                let end_line = brace_block_end(&lines, i);
                let body = lines[i..end_line].join("\n");

                self.extract_calls(&mut parsed, "rust", &fqn, &body, i + 1, &name);

                parsed.symbols.push(ParsedSymbol {
                    name,
                    fqn,
                    kind,
                    signature: Some(signature_of(line)),
                    docstring: doc_comment_above(&lines, i, "///"),
                    start_line: i + 1,
                    end_line,
                    body,
                });
            }
        }

        parsed
    }

    fn parse_js(&self, module: &str, content: &str, typescript: bool) -> ParsedFile {
        let lines: Vec<&str> = content.lines().collect();
        let mut parsed = ParsedFile::default();
        let language = if typescript { "typescript" } else { "javascript" };

        // Current class and the line its block ends on
        let mut class_scope: Option<(String, usize)> = None;

        for (i, line) in lines.iter().enumerate() {
            if let Some(caps) = self.matchers.js_import.captures(line) {
                parsed.imports.push(ParsedImport {
                    target: caps[1].to_string(),
                    start_line: i + 1,
                    end_line: i + 1,
                });
            } else if let Some(caps) = self.matchers.js_require.captures(line) {
                parsed.imports.push(ParsedImport {
                    target: caps[1].to_string(),
                    start_line: i + 1,
                    end_line: i + 1,
                });
            }

            if let Some((_, scope_end)) = &class_scope
                && i + 1 > *scope_end
            {
                class_scope = None;
            }

            if let Some(caps) = self.matchers.js_class.captures(line) {
                let name = caps[2].to_string();
                let fqn = format!("{module}.{name}");
                let end_line = brace_block_end(&lines, i);

                if let Some(parent) = caps.get(3) {
                    parsed.inherits.push(ParsedInherit {
                        child_fqn: fqn.clone(),
                        parent_name: parent.as_str().rsplit('.').next().unwrap_or("").to_string(),
                        is_implementation: false,
                        line: i + 1,
                    });
                }
                if let Some(interfaces) = caps.get(4) {
                    for parent in interfaces.as_str().split(',') {
                        let parent = parent.trim().rsplit('.').next().unwrap_or("");
                        if !parent.is_empty() {
                            parsed.inherits.push(ParsedInherit {
                                child_fqn: fqn.clone(),
                                parent_name: parent.to_string(),
                                is_implementation: true,
                                line: i + 1,
                            });
                        }
                    }
                }

                parsed.symbols.push(ParsedSymbol {
                    name: name.clone(),
                    fqn,
                    kind: SymbolKind::Class,
                    signature: Some(signature_of(line)),
                    docstring: None,
                    start_line: i + 1,
                    end_line,
                    body: lines[i..end_line].join("\n"),
                });
                class_scope = Some((name, end_line));
                continue;
            }

            if typescript && let Some(caps) = self.matchers.js_interface.captures(line) {
                let name = caps[2].to_string();
                let end_line = brace_block_end(&lines, i);
                parsed.symbols.push(ParsedSymbol {
                    name: name.clone(),
                    fqn: format!("{module}.{name}"),
                    kind: SymbolKind::Interface,
                    signature: Some(signature_of(line)),
                    docstring: None,
                    start_line: i + 1,
                    end_line,
                    body: lines[i..end_line].join("\n"),
                });
                continue;
            }

            let function_caps = self
                .matchers
                .js_function
                .captures(line)
                .or_else(|| self.matchers.js_arrow.captures(line));
            if let Some(caps) = function_caps {
                let name = caps[2].to_string();
                let fqn = format!("{module}.{name}");
                let end_line = brace_block_end(&lines, i);
                let body = lines[i..end_line].join("\n");

                self.extract_calls(&mut parsed, language, &fqn, &body, i + 1, &name);

                parsed.symbols.push(ParsedSymbol {
                    name,
                    fqn,
                    kind: SymbolKind::Function,
                    signature: Some(signature_of(line)),
                    docstring: None,
                    start_line: i + 1,
                    end_line,
                    body,
                });
                continue;
            }

            // Methods only inside a class block, and never keywords
            if let Some((class_name, scope_end)) = &class_scope
                && i + 1 <= *scope_end
                && let Some(caps) = self.matchers.js_method.captures(line)
            {
                let name = caps[2].to_string();
                if call_keywords(language).contains(&name.as_str()) {
                    continue;
                }
                let fqn = format!("{module}.{class_name}.{name}");
                let end_line = brace_block_end(&lines, i);
                let body = lines[i..end_line].join("\n");

                self.extract_calls(&mut parsed, language, &fqn, &body, i + 1, &name);

                parsed.symbols.push(ParsedSymbol {
                    name,
                    fqn,
                    kind: SymbolKind::Method,
                    signature: Some(signature_of(line)),
                    docstring: None,
                    start_line: i + 1,
                    end_line,
                    body,
                });
            }
        }

        parsed
    }

    fn parse_go(&self, module: &str, content: &str) -> ParsedFile {
        let lines: Vec<&str> = content.lines().collect();
        let mut parsed = ParsedFile::default();
        let mut in_import_block = false;

        for (i, line) in lines.iter().enumerate() {
            if line.trim_start().starts_with("import (") {
                in_import_block = true;
                continue;
            }
            if in_import_block {
                if line.trim() == ")" {
                    in_import_block = false;
                } else if let Some(caps) = self.matchers.go_import.captures(line) {
                    parsed.imports.push(ParsedImport {
                        target: caps[1].to_string(),
                        start_line: i + 1,
                        end_line: i + 1,
                    });
                }
                continue;
            }
            if line.starts_with("import ")
                && let Some(caps) = self.matchers.go_import.captures(line)
            {
                parsed.imports.push(ParsedImport {
                    target: caps[1].to_string(),
                    start_line: i + 1,
                    end_line: i + 1,
                });
                continue;
            }

            if let Some(caps) = self.matchers.go_type.captures(line) {
                let name = caps[1].to_string();
                let kind = if &caps[2] == "interface" {
                    SymbolKind::Interface
                } else {
                    SymbolKind::Class
                };
                let end_line = brace_block_end(&lines, i);
                parsed.symbols.push(ParsedSymbol {
                    name: name.clone(),
                    fqn: format!("{module}.{name}"),
                    kind,
                    signature: Some(signature_of(line)),
                    docstring: doc_comment_above(&lines, i, "//"),
                    start_line: i + 1,
                    end_line,
                    body: lines[i..end_line].join("\n"),
                });
                continue;
            }

            if let Some(caps) = self.matchers.go_func.captures(line) {
                let name = caps[2].to_string();
                let (fqn, kind) = match caps.get(1) {
                    Some(receiver) => (
                        format!("{module}.{}.{name}", receiver.as_str()),
                        SymbolKind::Method,
                    ),
                    None => (format!("{module}.{name}"), SymbolKind::Function),
                };
                let end_line = brace_block_end(&lines, i);
                let body = lines[i..end_line].join("\n");

                self.extract_calls(&mut parsed, "go", &fqn, &body, i + 1, &name);

                parsed.symbols.push(ParsedSymbol {
                    name,
                    fqn,
                    kind,
                    signature: Some(signature_of(line)),
                    docstring: doc_comment_above(&lines, i, "//"),
                    start_line: i + 1,
                    end_line,
                    body,
                });
            }
        }

        parsed
    }

    /// Scan a symbol body for `identifier(` call sites, skipping the
    /// definition line's own name and control-flow keywords.
    fn extract_calls(
        &self,
        parsed: &mut ParsedFile,
        language: &str,
        caller_fqn: &str,
        body: &str,
        body_start_line: usize,
        own_name: &str,
    ) {
        let keywords = call_keywords(language);
        let mut seen = std::collections::HashSet::new();

        for (offset, line) in body.lines().enumerate() {
            // Skip nested definition lines so `def helper(` is not a call
            if offset > 0
                && (line.trim_start().starts_with("def ")
                    || line.trim_start().starts_with("fn ")
                    || line.trim_start().starts_with("func "))
            {
                continue;
            }
            for caps in self.matchers.call_site.captures_iter(line) {
                let callee = caps[1].to_string();
                if keywords.contains(&callee.as_str()) {
                    continue;
                }
                if offset == 0 && callee == own_name {
                    continue;
                }
                // One call edge per (caller, callee); evidence is the first site
                if !seen.insert(callee.clone()) {
                    continue;
                }
                let line_no = body_start_line + offset;
                parsed.calls.push(ParsedCall {
                    caller_fqn: caller_fqn.to_string(),
                    callee_name: callee,
                    start_line: line_no,
                    end_line: line_no,
                });
            }
        }
    }
}

impl SourceParser for LineParser {
    fn parse(&self, language: &str, relative_path: &str, content: &str) -> ParseResult<ParsedFile> {
        let module = module_path(relative_path);

        let parsed = match language {
            "python" => self.parse_python(&module, content),
            "rust" => self.parse_rust(&module, content),
            "javascript" => self.parse_js(&module, content, false),
            "typescript" => self.parse_js(&module, content, true),
            "go" => self.parse_go(&module, content),
            other => {
                // Unknown languages yield empty collections per contract
                if config_for_language(other).is_none() {
                    tracing::debug!(language = other, "No parser for language");
                }
                ParsedFile::default()
            }
        };

        Ok(parsed)
    }
}

/// First line through the end of the indentation block starting at
/// `start` (exclusive end index usable for slicing; 1-based line number).
fn python_block_end(lines: &[&str], start: usize, indent: usize) -> usize {
    let mut end = start + 1;
    for (i, line) in lines.iter().enumerate().skip(start + 1) {
        if line.trim().is_empty() {
            continue;
        }
        let line_indent = line.len() - line.trim_start().len();
        if line_indent <= indent {
            break;
        }
        end = i + 1;
    }
    end
}

/// End line of a brace-delimited block starting at `start` (1-based,
/// inclusive). Declarations without a body (`;`-terminated) end on their
/// own line.
fn brace_block_end(lines: &[&str], start: usize) -> usize {
    let mut depth = 0i32;
    let mut opened = false;

    for (i, line) in lines.iter().enumerate().skip(start) {
        for c in line.chars() {
            match c {
                '{' => {
                    depth += 1;
                    opened = true;
                }
                '}' => depth -= 1,
                _ => {}
            }
        }
        if opened && depth <= 0 {
            return i + 1;
        }
        if !opened && line.trim_end().ends_with(';') {
            return i + 1;
        }
    }
    lines.len()
}

fn python_docstring(lines: &[&str], def_line: usize) -> Option<String> {
    python_docstring_at(lines, def_line + 1)
}

/// Triple-quoted string starting at or just after `start` (blank lines
/// skipped)
fn python_docstring_at(lines: &[&str], start: usize) -> Option<String> {
    let mut i = start;
    while i < lines.len() && lines[i].trim().is_empty() {
        i += 1;
    }
    let first = lines.get(i)?.trim();
    let quote = if first.starts_with("\"\"\"") {
        "\"\"\""
    } else if first.starts_with("'''") {
        "'''"
    } else {
        return None;
    };

    let inner = &first[quote.len()..];
    if let Some(end) = inner.find(quote) {
        let doc = inner[..end].trim();
        return (!doc.is_empty()).then(|| doc.to_string());
    }

    let mut doc = vec![inner.trim_end().to_string()];
    for line in lines.iter().skip(i + 1) {
        if let Some(end) = line.find(quote) {
            doc.push(line[..end].trim_end().to_string());
            break;
        }
        doc.push(line.trim_end().to_string());
    }
    let text = doc.join("\n").trim().to_string();
    (!text.is_empty()).then_some(text)
}

fn python_module_doc(lines: &[&str]) -> Option<String> {
    let mut i = 0;
    while i < lines.len() && (lines[i].trim().is_empty() || lines[i].trim_start().starts_with('#')) {
        i += 1;
    }
    let first = lines.get(i)?.trim();
    if first.starts_with("\"\"\"") || first.starts_with("'''") {
        python_docstring_at(lines, i)
    } else {
        None
    }
}

fn python_fqn(module: &str, class_stack: &[(usize, String)], name: &str) -> String {
    let mut parts = vec![module.to_string()];
    parts.extend(class_stack.iter().map(|(_, n)| n.clone()));
    parts.push(name.to_string());
    parts.join(".")
}

/// Contiguous comment block with `marker` immediately above `line_idx`
fn doc_comment_above(lines: &[&str], line_idx: usize, marker: &str) -> Option<String> {
    let mut doc = Vec::new();
    let mut i = line_idx;
    while i > 0 {
        i -= 1;
        let trimmed = lines[i].trim_start();
        if let Some(rest) = trimmed.strip_prefix(marker) {
            doc.push(rest.trim().to_string());
        } else if trimmed.starts_with("#[") || trimmed.starts_with('@') {
            // Attributes/decorators between doc and definition
            continue;
        } else {
            break;
        }
    }
    if doc.is_empty() {
        return None;
    }
    doc.reverse();
    Some(doc.join("\n"))
}

/// Leading comment block at the top of the file with `marker`
fn leading_comment_block(lines: &[&str], marker: &str) -> Option<String> {
    let mut doc = Vec::new();
    for line in lines {
        let trimmed = line.trim_start();
        if let Some(rest) = trimmed.strip_prefix(marker) {
            doc.push(rest.trim().to_string());
        } else if trimmed.is_empty() && doc.is_empty() {
            continue;
        } else {
            break;
        }
    }
    (!doc.is_empty()).then(|| doc.join("\n"))
}

/// The definition line without its trailing open brace
fn signature_of(line: &str) -> String {
    line.trim().trim_end_matches('{').trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(language: &str, path: &str, content: &str) -> ParsedFile {
        LineParser::new().parse(language, path, content).unwrap()
    }

    #[test]
    fn test_python_function_and_docstring() {
        let source = r#"
def greet(name):
    """Say hello."""
    message = format_greeting(name)
    return message
"#;
        let parsed = parse("python", "src/app.py", source);
        assert_eq!(parsed.symbols.len(), 1);
        let symbol = &parsed.symbols[0];
        assert_eq!(symbol.name, "greet");
        assert_eq!(symbol.fqn, "src.app.greet");
        assert_eq!(symbol.kind, SymbolKind::Function);
        assert_eq!(symbol.docstring.as_deref(), Some("Say hello."));

        let callees: Vec<&str> = parsed.calls.iter().map(|c| c.callee_name.as_str()).collect();
        assert!(callees.contains(&"format_greeting"));
        assert!(!callees.contains(&"return"));
    }

    #[test]
    fn test_python_method_fqn_includes_class() {
        let source = "
class Greeter:
    def hello(self):
        pass

    def bye(self):
        pass

def standalone():
    pass
";
        let parsed = parse("python", "pkg/greeter.py", source);
        let fqns: Vec<&str> = parsed.symbols.iter().map(|s| s.fqn.as_str()).collect();
        assert!(fqns.contains(&"pkg.greeter.Greeter"));
        assert!(fqns.contains(&"pkg.greeter.Greeter.hello"));
        assert!(fqns.contains(&"pkg.greeter.Greeter.bye"));
        assert!(fqns.contains(&"pkg.greeter.standalone"));

        let hello = parsed
            .symbols
            .iter()
            .find(|s| s.name == "hello")
            .unwrap();
        assert_eq!(hello.kind, SymbolKind::Method);
        let standalone = parsed
            .symbols
            .iter()
            .find(|s| s.name == "standalone")
            .unwrap();
        assert_eq!(standalone.kind, SymbolKind::Function);
    }

    #[test]
    fn test_python_inheritance() {
        let source = "
class Animal:
    pass

class Dog(Animal):
    pass
";
        let parsed = parse("python", "zoo.py", source);
        assert_eq!(parsed.inherits.len(), 1);
        assert_eq!(parsed.inherits[0].child_fqn, "zoo.Dog");
        assert_eq!(parsed.inherits[0].parent_name, "Animal");
        assert!(!parsed.inherits[0].is_implementation);
    }

    #[test]
    fn test_python_imports() {
        let source = "import os\nfrom collections import OrderedDict, defaultdict\n";
        let parsed = parse("python", "m.py", source);
        let targets: Vec<&str> = parsed.imports.iter().map(|i| i.target.as_str()).collect();
        assert_eq!(
            targets,
            vec![
                "os",
                "collections.OrderedDict",
                "collections.defaultdict"
            ]
        );
    }

    #[test]
    fn test_rust_functions_and_impl_methods() {
        let source = r#"
pub struct Engine {
    size: usize,
}

impl Engine {
    pub fn start(&self) {
        ignite();
    }
}

fn ignite() {
    println!("vroom");
}
"#;
        let parsed = parse("rust", "src/engine.rs", source);
        let fqns: Vec<&str> = parsed.symbols.iter().map(|s| s.fqn.as_str()).collect();
        assert!(fqns.contains(&"src.engine.Engine"));
        assert!(fqns.contains(&"src.engine.Engine.start"));
        assert!(fqns.contains(&"src.engine.ignite"));

        let start = parsed.symbols.iter().find(|s| s.name == "start").unwrap();
        assert_eq!(start.kind, SymbolKind::Method);

        let callees: Vec<&str> = parsed.calls.iter().map(|c| c.callee_name.as_str()).collect();
        assert!(callees.contains(&"ignite"));
    }

    #[test]
    fn test_rust_trait_impl_produces_implements() {
        let source = "
pub trait Runnable {
    fn run(&self);
}

pub struct Task;

impl Runnable for Task {
    fn run(&self) {}
}
";
        let parsed = parse("rust", "src/task.rs", source);
        assert_eq!(parsed.inherits.len(), 1);
        assert_eq!(parsed.inherits[0].child_fqn, "src.task.Task");
        assert_eq!(parsed.inherits[0].parent_name, "Runnable");
        assert!(parsed.inherits[0].is_implementation);

        let trait_symbol = parsed.symbols.iter().find(|s| s.name == "Runnable").unwrap();
        assert_eq!(trait_symbol.kind, SymbolKind::Interface);
    }

    #[test]
    fn test_typescript_class_extends_and_interface() {
        let source = "
interface Shape {
    area(): number;
}

class Circle extends Base implements Shape {
    area(): number {
        return compute(this.r);
    }
}
";
        let parsed = parse("typescript", "src/shapes.ts", source);
        let names: Vec<&str> = parsed.symbols.iter().map(|s| s.name.as_str()).collect();
        assert!(names.contains(&"Shape"));
        assert!(names.contains(&"Circle"));
        assert!(names.contains(&"area"));

        let kinds: Vec<(String, bool)> = parsed
            .inherits
            .iter()
            .map(|i| (i.parent_name.clone(), i.is_implementation))
            .collect();
        assert!(kinds.contains(&("Base".to_string(), false)));
        assert!(kinds.contains(&("Shape".to_string(), true)));
    }

    #[test]
    fn test_go_receiver_method() {
        let source = "
package engine

import (
    \"fmt\"
)

type Engine struct {
    size int
}

func (e *Engine) Start() {
    ignite()
}

func ignite() {
    fmt.Println(\"vroom\")
}
";
        let parsed = parse("go", "engine/engine.go", source);
        let fqns: Vec<&str> = parsed.symbols.iter().map(|s| s.fqn.as_str()).collect();
        assert!(fqns.contains(&"engine.engine.Engine"));
        assert!(fqns.contains(&"engine.engine.Engine.Start"));
        assert!(fqns.contains(&"engine.engine.ignite"));
        assert_eq!(parsed.imports.len(), 1);
        assert_eq!(parsed.imports[0].target, "fmt");
    }

    #[test]
    fn test_unknown_language_yields_empty() {
        let parsed = parse("cobol", "prog.cbl", "PROCEDURE DIVISION.");
        assert!(parsed.symbols.is_empty());
        assert!(parsed.imports.is_empty());
        assert!(parsed.calls.is_empty());
    }

    #[test]
    fn test_parse_is_deterministic() {
        let source = "def a():\n    b()\n\ndef b():\n    pass\n";
        let first = parse("python", "x.py", source);
        let second = parse("python", "x.py", source);
        let fqns = |p: &ParsedFile| {
            p.symbols
                .iter()
                .map(|s| s.fqn.clone())
                .collect::<Vec<_>>()
        };
        assert_eq!(fqns(&first), fqns(&second));
        assert_eq!(first.calls.len(), second.calls.len());
    }

    #[test]
    fn test_module_path_strips_extension() {
        assert_eq!(module_path("src/utils/helpers.py"), "src.utils.helpers");
        assert_eq!(module_path("main.go"), "main");
        assert_eq!(module_path("noext"), "noext");
    }
}
