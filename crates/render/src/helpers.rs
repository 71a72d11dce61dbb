//! 模板过滤器与函数

use std::collections::HashMap;

use serde_json::Value;
use tera::{Tera, to_value};

pub(crate) fn register(tera: &mut Tera) {
    tera.register_filter("multiply", multiply);
    tera.register_filter("fixed", fixed);
    tera.register_function("int_range", int_range);
}

fn number(value: &Value, what: &str) -> tera::Result<f64> {
    value
        .as_f64()
        .ok_or_else(|| tera::Error::msg(format!("{} expects a number, got {}", what, value)))
}

/// `{{ x | multiply(by=100) }}`
fn multiply(value: &Value, args: &HashMap<String, Value>) -> tera::Result<Value> {
    let by = match args.get("by") {
        Some(by) => number(by, "multiply `by`")?,
        None => return Err(tera::Error::msg("multiply requires a `by` argument")),
    };

    Ok(to_value(number(value, "multiply")? * by)?)
}

/// `{{ x | fixed }}`，默认保留两位小数
fn fixed(value: &Value, args: &HashMap<String, Value>) -> tera::Result<Value> {
    let digits = match args.get("digits") {
        Some(d) => d
            .as_u64()
            .ok_or_else(|| tera::Error::msg("fixed `digits` must be a positive integer"))?
            as usize,
        None => 2,
    };

    Ok(to_value(format!("{:.*}", digits, number(value, "fixed")?))?)
}

/// `int_range(start=0, end=24)`，`end < start` 时为空
fn int_range(args: &HashMap<String, Value>) -> tera::Result<Value> {
    let bound = |name: &str| {
        args.get(name)
            .and_then(Value::as_i64)
            .ok_or_else(|| tera::Error::msg(format!("int_range requires an integer `{}`", name)))
    };

    let (start, end) = (bound("start")?, bound("end")?);
    let range: Vec<i64> = if end < start { Vec::new() } else { (start..end).collect() };
    Ok(to_value(range)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn args(pairs: &[(&str, Value)]) -> HashMap<String, Value> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn test_multiply() {
        let result = multiply(&json!(0.5), &args(&[("by", json!(100))])).unwrap();
        assert_eq!(result, json!(50.0));
        assert!(multiply(&json!(1), &HashMap::new()).is_err());
        assert!(multiply(&json!("x"), &args(&[("by", json!(2))])).is_err());
    }

    #[test]
    fn test_fixed() {
        assert_eq!(fixed(&json!(1.0 / 3.0), &HashMap::new()).unwrap(), json!("0.33"));
        assert_eq!(fixed(&json!(2), &args(&[("digits", json!(0))])).unwrap(), json!("2"));
    }

    #[test]
    fn test_int_range() {
        let result = int_range(&args(&[("start", json!(2)), ("end", json!(5))])).unwrap();
        assert_eq!(result, json!([2, 3, 4]));

        let empty = int_range(&args(&[("start", json!(5)), ("end", json!(2))])).unwrap();
        assert_eq!(empty, json!([]));

        assert!(int_range(&args(&[("start", json!(1))])).is_err());
    }

    #[test]
    fn test_helpers_in_template() {
        let mut tera = Tera::default();
        register(&mut tera);
        tera.add_raw_template(
            "t.html",
            "{% for h in int_range(start=0, end=3) %}{{ h }}{% endfor %}|{{ 0.1234 | multiply(by=100) | fixed(digits=1) }}",
        )
        .unwrap();

        let page = tera.render("t.html", &tera::Context::new()).unwrap();
        assert_eq!(page, "012|12.3");
    }
}
