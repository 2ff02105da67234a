/// Decides whether a formatted message may be delivered.
pub trait ContentPolicy {
    fn allows(&self, content: &str) -> bool;
}

impl<F> ContentPolicy for F
where
    F: Fn(&str) -> bool,
{
    fn allows(&self, content: &str) -> bool {
        self(content)
    }
}

/// Rejects any content containing one of the listed phrases.
#[derive(Debug, Clone, Default)]
pub struct SuppressedPhrases {
    phrases: Vec<String>,
}

impl SuppressedPhrases {
    pub fn new<I, S>(phrases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            phrases: phrases
                .into_iter()
                .map(Into::into)
                .filter(|p: &String| !p.is_empty())
                .collect(),
        }
    }

    pub fn phrases(&self) -> &[String] {
        &self.phrases
    }

    /// First suppressed phrase found in `content`.
    pub fn matched<'a>(&'a self, content: &str) -> Option<&'a str> {
        self.phrases
            .iter()
            .find(|phrase| content.contains(phrase.as_str()))
            .map(String::as_str)
    }
}

impl ContentPolicy for SuppressedPhrases {
    fn allows(&self, content: &str) -> bool {
        self.matched(content).is_none()
    }
}
