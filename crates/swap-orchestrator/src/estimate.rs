//! Difficulty estimation from query text
//!
//! Used when the caller does not supply a difficulty. The score is a
//! deterministic function of the text: length, reasoning cues, code and math
//! markers. A specialty tag is inferred when code or math dominates.

const REASONING_CUES: &[&str] = &[
    "why",
    "explain",
    "prove",
    "derive",
    "analyze",
    "analyse",
    "compare",
    "step by step",
    "trade-off",
    "tradeoff",
    "design",
    "optimize",
    "evaluate",
];

const CODE_CUES: &[&str] = &[
    "```", "fn ", "def ", "class ", "impl ", "function", "compile", "stack trace", "segfault",
    "refactor", "regex", "sql",
];

const MATH_CUES: &[&str] = &[
    "integral", "derivative", "equation", "theorem", "matrix", "probability", "√", "∫", "∑", "^2",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Estimate {
    /// 1-100
    pub difficulty: u8,
    pub specialty: Option<&'static str>,
}

fn count_cues(text: &str, cues: &[&str]) -> u32 {
    cues.iter().filter(|cue| text.contains(*cue)).count() as u32
}

pub fn estimate(text: &str) -> Estimate {
    let lower = text.to_lowercase();
    let words = lower.split_whitespace().count() as u32;

    let reasoning = count_cues(&lower, REASONING_CUES);
    let code = count_cues(&lower, CODE_CUES);
    let math = count_cues(&lower, MATH_CUES);

    let score = 10
        + (words / 8).min(40)
        + (reasoning * 12).min(30)
        + (code * 8).min(16)
        + (math * 8).min(16);

    let specialty = match (code, math) {
        (0, 0) => None,
        (c, m) if c >= m => Some("code"),
        _ => Some("math"),
    };

    Estimate {
        difficulty: score.clamp(1, 100) as u8,
        specialty,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_question_is_easy() {
        let estimate = estimate("What is the capital of France?");
        assert!(estimate.difficulty < 30);
        assert_eq!(estimate.specialty, None);
    }

    #[test]
    fn test_reasoning_raises_score() {
        let plain = estimate("Tell me about sorting algorithms");
        let hard = estimate("Explain why quicksort is faster in practice and compare it step by step with mergesort");
        assert!(hard.difficulty > plain.difficulty);
    }

    #[test]
    fn test_specialty_inference() {
        assert_eq!(
            estimate("Why does this fn not compile?\n```rust\nfn main() {}\n```").specialty,
            Some("code")
        );
        assert_eq!(
            estimate("Solve the equation and find the derivative").specialty,
            Some("math")
        );
    }

    #[test]
    fn test_deterministic_and_bounded() {
        let long = "explain why ".repeat(500);
        let a = estimate(&long);
        assert_eq!(a, estimate(&long));
        assert!(a.difficulty <= 100);
        assert!(estimate("").difficulty >= 1);
    }
}
