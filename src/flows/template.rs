//! `{Key}` placeholder rendering.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

use regex::Regex;

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("static regex"));

/// Replace every `{key}` in `template` with its bound value.
///
/// Placeholders without a binding are left verbatim. Values are inserted
/// as-is, so a value that itself contains `{key}` is not re-expanded.
pub fn render(template: &str, bindings: &BTreeMap<String, String>) -> String {
    bindings.iter().fold(template.to_string(), |acc, (key, value)| {
        acc.replace(&format!("{{{key}}}"), value)
    })
}

/// Distinct placeholder names used by a template, in sorted order.
pub fn placeholders(template: &str) -> BTreeSet<String> {
    PLACEHOLDER
        .captures_iter(template)
        .map(|c| c[1].to_string())
        .collect()
}

/// Placeholders in `template` that none of `known` would fill.
pub fn unbound_placeholders<'a>(
    template: &str,
    known: impl IntoIterator<Item = &'a str>,
) -> Vec<String> {
    let known: BTreeSet<&str> = known.into_iter().collect();
    placeholders(template)
        .into_iter()
        .filter(|p| !known.contains(p.as_str()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bindings(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn renders_appointment_reminder() {
        let b = bindings(&[("Nombre", "Ana"), ("Hora", "10:00")]);
        assert_eq!(
            render("Hola {Nombre}, tu cita es a las {Hora}", &b),
            "Hola Ana, tu cita es a las 10:00"
        );
    }

    #[test]
    fn replaces_every_occurrence() {
        let b = bindings(&[("Nombre", "Ana")]);
        assert_eq!(render("{Nombre} {Nombre}", &b), "Ana Ana");
    }

    #[test]
    fn unbound_placeholders_stay_verbatim() {
        let b = bindings(&[("Nombre", "Ana")]);
        assert_eq!(
            render("Hola {Nombre}, con {Doctor}", &b),
            "Hola Ana, con {Doctor}"
        );
        assert_eq!(render("Sin variables", &b), "Sin variables");
    }

    #[test]
    fn rendering_twice_is_a_no_op() {
        let b = bindings(&[("Nombre", "Ana"), ("Fecha", "09/03/2026")]);
        let once = render("{Nombre} el {Fecha}", &b);
        assert_eq!(render(&once, &b), once);
        assert!(placeholders(&once).is_empty());
    }

    #[test]
    fn values_containing_placeholders_are_not_sanitized() {
        // BTreeMap iterates Apellidos before Nombre, so the injected
        // placeholder survives one pass and only expands on a second.
        let b = bindings(&[("Nombre", "{Apellidos}"), ("Apellidos", "López")]);
        let once = render("{Nombre}", &b);
        assert_eq!(once, "{Apellidos}");
        assert_eq!(render(&once, &b), "López");
    }

    #[test]
    fn finds_unknown_placeholders() {
        let t = "Hola {Nombre}, tu {Tratamiento} con {Dentista}";
        assert_eq!(
            placeholders(t).into_iter().collect::<Vec<_>>(),
            vec!["Dentista", "Nombre", "Tratamiento"]
        );
        assert_eq!(
            unbound_placeholders(t, ["Nombre", "Tratamiento"]),
            vec!["Dentista".to_string()]
        );
    }
}
