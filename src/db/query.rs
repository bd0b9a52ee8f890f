// Script splitting helpers for the execution path

/// Split a SQL script into individually executable statements.
///
/// Splits on `;` outside of single-quoted strings, double-quoted identifiers,
/// `--` line comments and `/* */` block comments. Each statement keeps its
/// terminating `;`. A doubled `''` inside a string is an escaped quote.
/// Fragments that are empty (or a lone `;`) after trimming are dropped, and an
/// unterminated string or comment simply runs to the end of the input.
pub fn split_sql_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut in_single_quote = false;
    let mut in_double_quote = false;
    let mut in_line_comment = false;
    let mut in_block_comment = false;

    let mut chars = sql.chars().peekable();
    while let Some(ch) = chars.next() {
        let next = chars.peek().copied();

        if in_line_comment {
            current.push(ch);
            if ch == '\n' || ch == '\r' {
                in_line_comment = false;
            }
            continue;
        }

        if in_block_comment {
            current.push(ch);
            if ch == '*' && next == Some('/') {
                current.push('/');
                chars.next();
                in_block_comment = false;
            }
            continue;
        }

        if in_single_quote {
            current.push(ch);
            if ch == '\'' {
                if next == Some('\'') {
                    current.push('\'');
                    chars.next();
                } else {
                    in_single_quote = false;
                }
            }
            continue;
        }

        if in_double_quote {
            current.push(ch);
            if ch == '"' {
                in_double_quote = false;
            }
            continue;
        }

        match ch {
            '-' if next == Some('-') => {
                in_line_comment = true;
                current.push(ch);
            }
            '/' if next == Some('*') => {
                in_block_comment = true;
                current.push_str("/*");
                chars.next();
            }
            '\'' => {
                in_single_quote = true;
                current.push(ch);
            }
            '"' => {
                in_double_quote = true;
                current.push(ch);
            }
            ';' => {
                current.push(ch);
                push_statement(&mut statements, &current);
                current.clear();
            }
            _ => current.push(ch),
        }
    }

    push_statement(&mut statements, &current);
    statements
}

fn push_statement(statements: &mut Vec<String>, fragment: &str) {
    let stmt = fragment.trim();
    if !stmt.is_empty() && stmt != ";" {
        statements.push(stmt.to_string());
    }
}

/// Shorten a statement for display. Strings longer than `max_len` characters
/// are cut to `max_len - 3` characters, followed by `...` when `ellipsis` is set.
pub fn trim_statement(statement: &str, max_len: usize, ellipsis: bool) -> String {
    if statement.chars().count() <= max_len {
        return statement.to_string();
    }

    let mut trimmed: String = statement.chars().take(max_len.saturating_sub(3)).collect();
    if ellipsis {
        trimmed.push_str("...");
    }
    trimmed
}
