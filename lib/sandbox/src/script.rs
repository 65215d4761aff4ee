//! Entry script generation.
//!
//! The generated script installs the allowed packages, loads the run input
//! from the file named by `AUTOFLOW_INPUT` into `input_data` (Python) or
//! `inputData` (JavaScript), then runs the user's code verbatim.

use crate::config::Language;

/// Name of the input document written next to the script.
pub const INPUT_FILE: &str = "input.json";

/// Renders the entry script for `language`.
#[must_use]
pub fn render(language: Language, code: &str, packages: &[String]) -> String {
    match language {
        Language::Python => render_python(code, packages),
        Language::JavaScript => render_javascript(code, packages),
    }
}

fn quoted(package: &str) -> String {
    serde_json::Value::String(package.to_string()).to_string()
}

fn render_python(code: &str, packages: &[String]) -> String {
    let mut script = String::from("import json\nimport os\nimport subprocess\nimport sys\n\n");
    for package in packages {
        script.push_str(&format!(
            "subprocess.run([sys.executable, \"-m\", \"pip\", \"install\", \"--quiet\", {}], \
             stdout=subprocess.DEVNULL, check=False)\n",
            quoted(package)
        ));
    }
    script.push_str(&format!(
        "\nwith open(os.environ.get(\"AUTOFLOW_INPUT\", \"{INPUT_FILE}\")) as _autoflow_input:\n    \
         input_data = json.load(_autoflow_input)\n\n"
    ));
    script.push_str(code);
    script.push('\n');
    script
}

fn render_javascript(code: &str, packages: &[String]) -> String {
    let mut script = String::from(
        "const fs = require('fs');\nconst { execFileSync } = require('child_process');\n\n",
    );
    for package in packages {
        script.push_str(&format!(
            "try {{ execFileSync('npm', ['install', '--silent', '--no-save', {}], {{ stdio: 'ignore' }}); }} catch (e) {{}}\n",
            quoted(package)
        ));
    }
    script.push_str(&format!(
        "\nconst inputData = JSON.parse(fs.readFileSync(process.env.AUTOFLOW_INPUT || '{INPUT_FILE}', 'utf8'));\n\n"
    ));
    script.push_str(code);
    script.push('\n');
    script
}
