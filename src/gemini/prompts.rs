use serde::de::DeserializeOwned;

use crate::core::{
    domain::{Challenge, Difficulty, ExecutionResult, Summary},
    traits::provider::ProviderError,
};

pub fn challenge_prompt(topic: &str, difficulty: Difficulty) -> String {
    format!(
        r#"You are a coding challenge generator for JavaScript developers.

Generate a {difficulty} difficulty JavaScript coding challenge about: "{topic}"

Requirements:
- Create a realistic programming problem
- Include a clear, concise problem statement
- Provide 2-3 example inputs and outputs
- List any constraints (time/space complexity, edge cases)
- Generate exactly 5 test cases with inputs and expected outputs
- Provide a function signature for the solution
- Make sure the challenge is solvable in a single function

Format your response EXACTLY as this JSON structure (no markdown, just raw JSON):
{{
  "title": "Challenge title (short, descriptive)",
  "description": "Detailed problem statement explaining what needs to be solved",
  "examples": [
    {{
      "input": "Example input as string",
      "output": "Expected output as string",
      "explanation": "Why this is the output"
    }}
  ],
  "constraints": [
    "Constraint 1",
    "Constraint 2"
  ],
  "testCases": [
    {{
      "input": [arg1, arg2, arg3],
      "expectedOutput": expectedResult
    }}
  ],
  "functionSignature": "function solution(param1, param2) {{ }}"
}}

IMPORTANT for testCases.input:
- The "input" array contains the function arguments in order
- If the function takes ONE array parameter like function(numbers), use: "input": [[1,2,3,4,5]]
- If the function takes TWO parameters like function(arr, target), use: "input": [[1,2,3], 5]
- If the function takes primitive parameters like function(a, b), use: "input": [10, 20]
- Each element in the "input" array is ONE function argument

Ensure test cases cover:
- Basic/happy path cases
- Edge cases (empty inputs, single elements, etc.)
- Boundary conditions

Generate the challenge now:"#
    )
}

pub fn review_prompt(challenge: &Challenge, code: &str, results: &[ExecutionResult]) -> String {
    let summary = Summary::of(results);
    format!(
        r#"You are a code review expert for JavaScript.

Challenge: {title}
{description}

User's Solution:
```javascript
{code}
```

Test Results: {passed}/{total} tests passed

Analyze this solution and provide detailed feedback.

Format your response EXACTLY as this JSON structure (no markdown, just raw JSON):
{{
  "isCorrect": true/false,
  "score": 0-100,
  "feedback": "Overall assessment of the solution quality, correctness, and approach",
  "strengths": [
    "What the user did well",
    "Good practices observed"
  ],
  "improvements": [
    "Specific suggestions for improvement",
    "Code quality issues",
    "Edge cases not handled"
  ],
  "alternativeApproaches": [
    "Different ways to solve this problem",
    "More efficient algorithms or patterns"
  ],
  "complexity": {{
    "time": "O(n) or relevant complexity",
    "space": "O(1) or relevant complexity"
  }}
}}

Criteria:
- Correctness: Does it solve the problem?
- Code quality: Readability, naming, structure
- Efficiency: Time/space complexity
- Edge cases: Handles all scenarios?
- Best practices: Modern JavaScript patterns

Provide the assessment now:"#,
        title = challenge.title,
        description = challenge.description,
        code = code.trim_end(),
        passed = summary.passed,
        total = summary.total,
    )
}

/// Parses a model reply, tolerating Markdown code fences around the JSON.
pub fn parse_json<T: DeserializeOwned>(text: &str) -> Result<T, ProviderError> {
    let cleaned = strip_fences(text);
    serde_json::from_str(&cleaned).map_err(|e| {
        tracing::error!("Failed to parse model response ({}): {}", e, cleaned);
        ProviderError::InvalidResponseFormat
    })
}

fn strip_fences(text: &str) -> String {
    let mut cleaned = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(pos) = rest.find("```") {
        cleaned.push_str(&rest[..pos]);
        rest = &rest[pos + 3..];
        rest = rest.strip_prefix("json").unwrap_or(rest);
        rest = rest.strip_prefix('\n').unwrap_or(rest);
    }
    cleaned.push_str(rest);
    cleaned.trim().to_string()
}
