//! Skill extraction against a curated vocabulary
//!
//! Title + description text is matched against canonical skills and their
//! aliases with word boundaries and plural-insensitive matching. The
//! result is a sorted, de-duplicated set of canonical tags.

use regex::Regex;
use std::sync::OnceLock;

/// canonical skill → aliases (the canonical name matches implicitly).
const SKILL_VOCABULARY: &[(&str, &[&str])] = &[
    ("python", &["python3"]),
    ("javascript", &["js", "ecmascript", "es6"]),
    ("typescript", &["ts"]),
    ("java", &[]),
    ("golang", &["go lang"]),
    ("rust", &["rustlang"]),
    ("c++", &["cpp"]),
    ("c#", &["csharp", ".net"]),
    ("ruby", &[]),
    ("php", &[]),
    ("swift", &[]),
    ("kotlin", &[]),
    ("scala", &[]),
    ("sql", &[]),
    ("react", &["reactjs", "react.js"]),
    ("vue", &["vuejs", "vue.js"]),
    ("angular", &["angularjs"]),
    ("svelte", &["sveltekit"]),
    ("nextjs", &["next.js", "next js"]),
    ("html", &["html5"]),
    ("css", &["css3", "scss", "sass"]),
    ("tailwind", &["tailwindcss"]),
    ("nodejs", &["node.js", "node js", "node"]),
    ("django", &[]),
    ("flask", &[]),
    ("fastapi", &[]),
    ("rails", &["ruby on rails"]),
    ("spring", &["spring boot", "springboot"]),
    ("graphql", &[]),
    ("rest", &["restful"]),
    ("grpc", &[]),
    ("aws", &["amazon web services"]),
    ("gcp", &["google cloud"]),
    ("azure", &[]),
    ("kubernetes", &["k8s"]),
    ("docker", &[]),
    ("terraform", &[]),
    ("ansible", &[]),
    ("postgresql", &["postgres", "psql"]),
    ("mysql", &[]),
    ("mongodb", &["mongo"]),
    ("redis", &[]),
    ("elasticsearch", &["elastic"]),
    ("kafka", &[]),
    ("spark", &["pyspark"]),
    ("airflow", &[]),
    ("dbt", &[]),
    ("pandas", &[]),
    ("numpy", &[]),
    ("pytorch", &["torch"]),
    ("tensorflow", &[]),
    ("git", &["github", "gitlab"]),
    ("ci/cd", &["cicd", "continuous integration", "continuous deployment"]),
    ("microservices", &["micro-services"]),
    ("linux", &["unix"]),
];

fn compiled() -> &'static Vec<(&'static str, Vec<Regex>)> {
    static COMPILED: OnceLock<Vec<(&'static str, Vec<Regex>)>> = OnceLock::new();
    COMPILED.get_or_init(|| {
        SKILL_VOCABULARY
            .iter()
            .map(|(canonical, aliases)| {
                let patterns = std::iter::once(*canonical)
                    .chain(aliases.iter().copied())
                    .map(alias_pattern)
                    .collect();
                (*canonical, patterns)
            })
            .collect()
    })
}

/// Word-boundary pattern for an alias. Alphabetic endings accept an
/// optional plural `s`.
fn alias_pattern(alias: &str) -> Regex {
    let escaped = regex::escape(alias);
    let pattern = if alias.ends_with(|c: char| c.is_ascii_alphabetic()) {
        format!(r"(^|[^a-z0-9+#.]){escaped}s?($|[^a-z0-9+#])")
    } else {
        format!(r"(^|[^a-z0-9+#.]){escaped}($|[^a-z0-9])")
    };
    Regex::new(&pattern).unwrap()
}

/// Extract the canonical skill set from title + description text.
pub fn extract_skills(title: &str, description: Option<&str>) -> Vec<String> {
    let text = format!("{} {}", title, description.unwrap_or("")).to_lowercase();

    let mut skills: Vec<String> = compiled()
        .iter()
        .filter(|(_, patterns)| patterns.iter().any(|p| p.is_match(&text)))
        .map(|(canonical, _)| canonical.to_string())
        .collect();

    skills.sort();
    skills.dedup();
    skills
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_canonical_and_aliases() {
        let skills = extract_skills(
            "Backend Engineer",
            Some("We use Rust, Postgres and k8s in production."),
        );
        assert!(skills.contains(&"rust".to_string()));
        assert!(skills.contains(&"postgresql".to_string()));
        assert!(skills.contains(&"kubernetes".to_string()));
    }

    #[test]
    fn word_boundaries_prevent_substring_hits() {
        // "scala" must not fire on "scalable"
        let skills = extract_skills("Engineer", Some("build scalable systems"));
        assert!(!skills.contains(&"scala".to_string()));
        // "go" is not in the vocabulary precisely because of this; golang is
        let skills = extract_skills("Engineer", Some("we're going to write golang services"));
        assert!(skills.contains(&"golang".to_string()));
    }

    #[test]
    fn plural_forms_match() {
        let skills = extract_skills("Engineer", Some("experience with containers and dockers"));
        assert!(skills.contains(&"docker".to_string()));
    }

    #[test]
    fn result_is_sorted_and_unique() {
        let skills = extract_skills(
            "TypeScript Engineer",
            Some("TypeScript, typescript and ts everywhere"),
        );
        assert_eq!(skills, vec!["typescript".to_string()]);
    }

    #[test]
    fn special_characters_in_names() {
        let skills = extract_skills("Engineer", Some("C++ and C# welcome"));
        assert!(skills.contains(&"c++".to_string()));
        assert!(skills.contains(&"c#".to_string()));
    }
}
