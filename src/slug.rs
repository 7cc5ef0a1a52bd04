//! Team-name slugs.
//!
//! The hosted platform derives a URL-safe slug from every team name. The
//! planner derives the same slug locally so that a team declared in the
//! source tree can be matched against its remote counterpart, including
//! teams the remote has not seen yet.

/// Derive the canonical slug for a team name.
///
/// Lowercase ASCII; common accented Latin letters are transliterated,
/// every other non-alphanumeric run collapses to a single `-`, with no
/// leading or trailing dash. The function is pure: the same name always
/// yields the same slug.
pub fn make(name: &str) -> String {
    let mut folded = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii() {
            folded.push(c.to_ascii_lowercase());
        } else if let Some(t) = transliterate(c) {
            folded.push_str(t);
        } else {
            // unknown character, acts as a separator
            folded.push(' ');
        }
    }

    folded
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

/// Best-effort ASCII transliteration for Latin letters with diacritics.
fn transliterate(c: char) -> Option<&'static str> {
    let t = match c {
        'à' | 'á' | 'â' | 'ã' | 'ä' | 'å' | 'À' | 'Á' | 'Â' | 'Ã' | 'Ä' | 'Å' => "a",
        'æ' | 'Æ' => "ae",
        'ç' | 'Ç' => "c",
        'è' | 'é' | 'ê' | 'ë' | 'È' | 'É' | 'Ê' | 'Ë' => "e",
        'ì' | 'í' | 'î' | 'ï' | 'Ì' | 'Í' | 'Î' | 'Ï' => "i",
        'ñ' | 'Ñ' => "n",
        'ò' | 'ó' | 'ô' | 'õ' | 'ö' | 'ø' | 'Ò' | 'Ó' | 'Ô' | 'Õ' | 'Ö' | 'Ø' => "o",
        'œ' | 'Œ' => "oe",
        'ù' | 'ú' | 'û' | 'ü' | 'Ù' | 'Ú' | 'Û' | 'Ü' => "u",
        'ý' | 'ÿ' | 'Ý' => "y",
        'ß' => "ss",
        _ => return None,
    };
    Some(t)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_name() {
        assert_eq!(make("existing"), "existing");
        assert_eq!(make("platform"), "platform");
    }

    #[test]
    fn test_spaces_become_dashes() {
        assert_eq!(make("exist ing"), "exist-ing");
        assert_eq!(make("DevOps Core"), "devops-core");
    }

    #[test]
    fn test_runs_collapse() {
        assert_eq!(make("a  b"), "a-b");
        assert_eq!(make("a - _ b"), "a-b");
    }

    #[test]
    fn test_trimmed() {
        assert_eq!(make("--ops--"), "ops");
        assert_eq!(make("  ops  "), "ops");
    }

    #[test]
    fn test_accents_transliterated() {
        assert_eq!(make("nouveauté"), "nouveaute");
        assert_eq!(make("Équipe Réseau"), "equipe-reseau");
    }

    #[test]
    fn test_designed_collisions() {
        // names differing only by case or punctuation share a slug
        assert_eq!(make("team α"), make("Team-α"));
        assert_eq!(make("My Team"), make("my-team"));
    }

    #[test]
    fn test_owners_suffix_composes() {
        let name = "nouveauté";
        assert_eq!(make(&format!("{}-owners", name)), "nouveaute-owners");
        assert_eq!(make(&format!("{}-owners", name)), format!("{}-owners", make(name)));
    }

    #[test]
    fn test_pure() {
        for name in ["exist ing", "nouveauté", "A.B.C"] {
            assert_eq!(make(name), make(name));
        }
    }
}
