use crate::normalize::is_zip;

/// Look up the post office city and state for a US ZIP code
pub fn lookup_place(zip: &str) -> Option<(String, String)> {
    if !is_zip(zip) {
        return None;
    }
    // Avoid zipcodes::matching to suppress debug_print output.
    let results = zipcodes::filter_by(vec![|z| z.zip_code == zip], None).ok()?;
    let info = results.first()?;
    Some((info.city.clone(), info.state.clone()))
}

/// "90210 (Beverly Hills, CA)" when the ZIP is known, else the ZIP itself
pub fn describe_zip(zip: &str) -> String {
    match lookup_place(zip) {
        Some((city, state)) => format!("{} ({}, {})", zip, title_case(&city), state),
        None => zip.to_string(),
    }
}

fn title_case(text: &str) -> String {
    text.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first
                    .to_uppercase()
                    .chain(chars.flat_map(char::to_lowercase))
                    .collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_title_case() {
        assert_eq!(title_case("BEVERLY HILLS"), "Beverly Hills");
        assert_eq!(title_case("saint  louis"), "Saint Louis");
    }

    #[test]
    fn test_non_zip_is_passed_through() {
        assert_eq!(lookup_place("Cook"), None);
        assert_eq!(describe_zip("abcde"), "abcde");
    }
}
