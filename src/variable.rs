// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

//! `${name}` variables and template rendering.
//!
//! A variable's raw value may reference other variables. Resolution is depth-first with
//! memoization: once a variable is resolved its value is cached and never recomputed. A
//! reference back to a variable that is still being resolved is a cycle and fails with
//! `Error::VariableCycle` instead of recursing forever.

use std::collections::BTreeMap;

use {lazy_static::lazy_static, regex::Regex};

use crate::error::{Error, Result};

lazy_static! {
    static ref REFERENCE: Regex = Regex::new(r"\$\{([^${}]+)\}").unwrap();
}

#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    pub name: String,
    pub raw: String,
    value: Option<String>,
}

impl Variable {
    pub fn new(name: &str, raw: &str) -> Self {
        Variable {
            name: name.to_string(),
            raw: raw.to_string(),
            value: None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.value.is_some()
    }

    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Variables {
    vars: BTreeMap<String, Variable>,
}

/// Replace every `${name}` in `text` with `lookup(name)`. Stops at the first failing lookup.
fn substitute<F>(text: &str, mut lookup: F) -> Result<String>
where
    F: FnMut(&str) -> Result<String>,
{
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for caps in REFERENCE.captures_iter(text) {
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        out.push_str(&text[last..whole.start()]);
        out.push_str(&lookup(name.as_str())?);
        last = whole.end();
    }
    out.push_str(&text[last..]);
    Ok(out)
}

impl Variables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: &str, raw: &str) -> Result<()> {
        if self.vars.contains_key(name) {
            return Err(Error::DuplicateVariable(name.to_string()));
        }
        self.vars.insert(name.to_string(), Variable::new(name, raw));
        Ok(())
    }

    /// Resolve every registered variable. Already resolved variables are left alone, so this can
    /// be called again after registering more variables.
    pub fn build(&mut self) -> Result<()> {
        let names: Vec<String> = self.vars.keys().cloned().collect();
        for name in names {
            let mut visiting = Vec::new();
            self.resolve(&name, &mut visiting)?;
        }
        Ok(())
    }

    fn resolve(&mut self, name: &str, visiting: &mut Vec<String>) -> Result<String> {
        let var = self
            .vars
            .get(name)
            .ok_or_else(|| Error::UndefinedVariable(name.to_string()))?;
        if let Some(value) = &var.value {
            return Ok(value.clone());
        }
        if let Some(pos) = visiting.iter().position(|v| v == name) {
            let mut chain = visiting[pos..].to_vec();
            chain.push(name.to_string());
            return Err(Error::VariableCycle(chain));
        }

        let raw = var.raw.clone();
        visiting.push(name.to_string());
        let value = substitute(&raw, |reference| self.resolve(reference, visiting))?;
        visiting.pop();

        if let Some(var) = self.vars.get_mut(name) {
            var.value = Some(value.clone());
        }
        Ok(value)
    }

    /// Get the resolved value of `name`.
    pub fn get(&self, name: &str) -> Result<&str> {
        let var = self
            .vars
            .get(name)
            .ok_or_else(|| Error::UndefinedVariable(name.to_string()))?;
        var.value()
            .ok_or_else(|| Error::UnresolvedVariable(name.to_string()))
    }

    /// Substitute every `${name}` in `template`. Fails with the first name that does not
    /// resolve.
    pub fn render(&self, template: &str) -> Result<String> {
        substitute(template, |name| self.get(name).map(str::to_string))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.vars.contains_key(name)
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(entries: &[(&str, &str)]) -> Variables {
        let mut vars = Variables::new();
        for (name, raw) in entries {
            vars.register(name, raw).unwrap();
        }
        vars
    }

    #[test]
    fn chaining() {
        let mut v = vars(&[("a", "${b}"), ("b", "x")]);
        v.build().unwrap();
        assert_eq!(v.get("a").unwrap(), "x");

        let mut v = vars(&[
            ("addr", "${ip}:${port}"),
            ("ip", "${host}"),
            ("host", "10.0.0.1"),
            ("port", "80"),
        ]);
        v.build().unwrap();
        assert_eq!(v.get("addr").unwrap(), "10.0.0.1:80");
    }

    #[test]
    fn self_reference_is_a_cycle() {
        let mut v = vars(&[("a", "x${a}")]);
        let err = v.build().unwrap_err();
        assert!(matches!(err, Error::VariableCycle(chain) if chain == vec!["a", "a"]));
    }

    #[test]
    fn mutual_reference_is_a_cycle() {
        let mut v = vars(&[("a", "${b}"), ("b", "${c}"), ("c", "${a}")]);
        let err = v.build().unwrap_err();
        assert!(matches!(err, Error::VariableCycle(chain) if chain == vec!["a", "b", "c", "a"]));
    }

    #[test]
    fn undefined_reference() {
        let mut v = vars(&[("a", "${nope}")]);
        assert!(matches!(v.build(), Err(Error::UndefinedVariable(n)) if n == "nope"));
    }

    #[test]
    fn get_before_build_is_unresolved() {
        let v = vars(&[("a", "x")]);
        assert!(matches!(v.get("a"), Err(Error::UnresolvedVariable(_))));
        assert!(matches!(v.get("b"), Err(Error::UndefinedVariable(_))));
    }

    #[test]
    fn build_is_idempotent() {
        let mut v = vars(&[("a", "${b}"), ("b", "x")]);
        v.build().unwrap();
        v.register("c", "${a}-${b}").unwrap();
        v.build().unwrap();
        assert_eq!(v.get("c").unwrap(), "x-x");
        assert!(v.register("a", "y").is_err());
    }

    #[test]
    fn render_reports_first_failure() {
        let mut v = vars(&[("a", "1")]);
        v.build().unwrap();
        assert_eq!(v.render("x=${a} y=${a}").unwrap(), "x=1 y=1");
        assert_eq!(v.render("no refs, $ and {}").unwrap(), "no refs, $ and {}");
        assert!(matches!(
            v.render("${a} ${missing} ${other}"),
            Err(Error::UndefinedVariable(n)) if n == "missing"
        ));
    }
}
