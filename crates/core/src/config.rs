use crate::{AppError, AppResult};

/// Expands `${NAME}` references in a raw configuration value.
///
/// Referenced values are expanded recursively through `lookup`. `$$` yields a literal `$`
/// and a `$` not followed by `{` is kept as is. Undefined names, unterminated references
/// and reference cycles are rejected.
pub fn expand<F>(raw: &str, lookup: F) -> AppResult<String>
where
    F: Fn(&str) -> Option<String>,
{
    let mut chain = Vec::new();
    expand_with_chain(raw, &lookup, &mut chain)
}

fn expand_with_chain<F>(raw: &str, lookup: &F, chain: &mut Vec<String>) -> AppResult<String>
where
    F: Fn(&str) -> Option<String>,
{
    let mut output = String::with_capacity(raw.len());
    let mut rest = raw;

    while let Some(position) = rest.find('$') {
        output.push_str(&rest[..position]);
        let tail = &rest[position + 1..];

        if let Some(after) = tail.strip_prefix('$') {
            output.push('$');
            rest = after;
            continue;
        }

        let Some(reference) = tail.strip_prefix('{') else {
            output.push('$');
            rest = tail;
            continue;
        };

        let Some(end) = reference.find('}') else {
            return Err(AppError::Validation(format!(
                "unterminated variable reference in '{raw}'"
            )));
        };

        let name = reference[..end].trim();
        if name.is_empty() {
            return Err(AppError::Validation(format!(
                "empty variable reference in '{raw}'"
            )));
        }

        if chain.iter().any(|visited| visited == name) {
            let mut cycle = chain.clone();
            cycle.push(name.to_owned());
            return Err(AppError::Validation(format!(
                "variable reference cycle detected: {}",
                cycle.join(" -> ")
            )));
        }

        let value = lookup(name).ok_or_else(|| {
            AppError::Validation(format!("variable '{name}' is not defined"))
        })?;

        chain.push(name.to_owned());
        let expanded = expand_with_chain(value.as_str(), lookup, chain)?;
        chain.pop();

        output.push_str(expanded.as_str());
        rest = &reference[end + 1..];
    }

    output.push_str(rest);
    Ok(output)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::expand;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let values: HashMap<String, String> = pairs
            .iter()
            .map(|(name, value)| ((*name).to_owned(), (*value).to_owned()))
            .collect();
        move |name| values.get(name).cloned()
    }

    #[test]
    fn expands_nested_references() {
        let lookup = lookup_from(&[("HOST", "db.internal"), ("URL", "postgres://${HOST}/grants")]);

        let expanded = expand("${URL}?sslmode=require", lookup);
        assert_eq!(
            expanded.ok().as_deref(),
            Some("postgres://db.internal/grants?sslmode=require")
        );
    }

    #[test]
    fn keeps_escaped_and_bare_dollars() {
        let expanded = expand("cost $$5 and $HOME", lookup_from(&[]));
        assert_eq!(expanded.ok().as_deref(), Some("cost $5 and $HOME"));
    }

    #[test]
    fn rejects_reference_cycles() {
        let lookup = lookup_from(&[("A", "${B}"), ("B", "x${A}")]);

        let error = expand("${A}", lookup).err().map(|error| error.to_string());
        assert!(error.is_some_and(|message| message.contains("A -> B -> A")));
    }

    #[test]
    fn rejects_undefined_and_unterminated_references() {
        assert!(expand("${MISSING}", lookup_from(&[])).is_err());
        assert!(expand("${OPEN", lookup_from(&[("OPEN", "x")])).is_err());
        assert!(expand("${ }", lookup_from(&[])).is_err());
    }

    #[test]
    fn same_variable_may_appear_twice_without_cycle() {
        let lookup = lookup_from(&[("NAME", "permita")]);
        let expanded = expand("${NAME}-${NAME}", lookup);
        assert_eq!(expanded.ok().as_deref(), Some("permita-permita"));
    }
}
