//! Native functions callable from scripts.
//!
//! Lookup is by position: the compiler registers these names in `BUILTINS`
//! order and the VM resolves `OpGetBuiltin n` to `BUILTINS[n]`, so entries may
//! only ever be appended.

use std::fmt;

use super::Object;

pub type BuiltinFn = fn(&[Object]) -> Option<Object>;

pub struct Builtin {
    pub name: &'static str,
    pub func: BuiltinFn,
}

impl fmt::Debug for Builtin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Builtin({})", self.name)
    }
}

impl PartialEq for Builtin {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

pub static BUILTINS: [Builtin; 6] = [
    Builtin { name: "len", func: len },
    Builtin { name: "puts", func: puts },
    Builtin { name: "first", func: first },
    Builtin { name: "last", func: last },
    Builtin { name: "rest", func: rest },
    Builtin { name: "push", func: push },
];

fn wrong_arg_count(got: usize, want: usize) -> Option<Object> {
    Some(Object::error(format!("wrong number of arguments. got={}, want={}", got, want)))
}

fn len(args: &[Object]) -> Option<Object> {
    let [arg] = args else {
        return wrong_arg_count(args.len(), 1);
    };
    Some(match arg {
        Object::String(s) => Object::Integer(s.len() as i64),
        Object::Array(elements) => Object::Integer(elements.len() as i64),
        other => Object::error(format!("argument to `len` not supported, got {}", other.object_type())),
    })
}

fn puts(args: &[Object]) -> Option<Object> {
    for arg in args {
        println!("{}", arg);
    }
    None
}

fn array_arg<'a>(name: &str, arg: &'a Object) -> Result<&'a [Object], Object> {
    match arg {
        Object::Array(elements) => Ok(elements),
        other => Err(Object::error(format!(
            "argument to `{}` must be ARRAY, got {}",
            name,
            other.object_type()
        ))),
    }
}

fn first(args: &[Object]) -> Option<Object> {
    let [arg] = args else {
        return wrong_arg_count(args.len(), 1);
    };
    match array_arg("first", arg) {
        Ok(elements) => Some(elements.first().cloned().unwrap_or(Object::Null)),
        Err(e) => Some(e),
    }
}

fn last(args: &[Object]) -> Option<Object> {
    let [arg] = args else {
        return wrong_arg_count(args.len(), 1);
    };
    match array_arg("last", arg) {
        Ok(elements) => Some(elements.last().cloned().unwrap_or(Object::Null)),
        Err(e) => Some(e),
    }
}

fn rest(args: &[Object]) -> Option<Object> {
    let [arg] = args else {
        return wrong_arg_count(args.len(), 1);
    };
    match array_arg("rest", arg) {
        Ok([]) => Some(Object::Null),
        Ok([_, tail @ ..]) => Some(Object::array(tail.to_vec())),
        Err(e) => Some(e),
    }
}

fn push(args: &[Object]) -> Option<Object> {
    let [arr, value] = args else {
        return wrong_arg_count(args.len(), 2);
    };
    match array_arg("push", arr) {
        Ok(elements) => {
            let mut extended = Vec::with_capacity(elements.len() + 1);
            extended.extend_from_slice(elements);
            extended.push(value.clone());
            Some(Object::array(extended))
        }
        Err(e) => Some(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(name: &str, args: &[Object]) -> Option<Object> {
        let builtin = BUILTINS.iter().find(|b| b.name == name).unwrap();
        (builtin.func)(args)
    }

    fn ints(values: &[i64]) -> Object {
        Object::array(values.iter().map(|&n| Object::Integer(n)).collect())
    }

    #[test]
    fn registry_order_is_stable() {
        let names: Vec<&str> = BUILTINS.iter().map(|b| b.name).collect();
        assert_eq!(names, ["len", "puts", "first", "last", "rest", "push"]);
    }

    #[test]
    fn len_of_strings_and_arrays() {
        assert_eq!(call("len", &[Object::string("")]), Some(Object::Integer(0)));
        assert_eq!(call("len", &[Object::string("four")]), Some(Object::Integer(4)));
        assert_eq!(call("len", &[ints(&[1, 2, 3])]), Some(Object::Integer(3)));
    }

    #[test]
    fn len_errors_are_values() {
        assert_eq!(
            call("len", &[Object::Integer(1)]),
            Some(Object::error("argument to `len` not supported, got INTEGER"))
        );
        assert_eq!(
            call("len", &[Object::string("one"), Object::string("two")]),
            Some(Object::error("wrong number of arguments. got=2, want=1"))
        );
    }

    #[test]
    fn first_last_rest() {
        assert_eq!(call("first", &[ints(&[1, 2, 3])]), Some(Object::Integer(1)));
        assert_eq!(call("first", &[ints(&[])]), Some(Object::Null));
        assert_eq!(call("last", &[ints(&[1, 2, 3])]), Some(Object::Integer(3)));
        assert_eq!(call("rest", &[ints(&[1, 2, 3])]), Some(ints(&[2, 3])));
        assert_eq!(call("rest", &[ints(&[])]), Some(Object::Null));
        assert_eq!(
            call("last", &[Object::Integer(1)]),
            Some(Object::error("argument to `last` must be ARRAY, got INTEGER"))
        );
    }

    #[test]
    fn push_leaves_original_untouched() {
        let original = ints(&[1]);
        assert_eq!(call("push", &[original.clone(), Object::Integer(2)]), Some(ints(&[1, 2])));
        assert_eq!(original, ints(&[1]));
        assert_eq!(
            call("push", &[Object::Integer(1), Object::Integer(1)]),
            Some(Object::error("argument to `push` must be ARRAY, got INTEGER"))
        );
    }

    #[test]
    fn puts_returns_nothing() {
        assert_eq!(call("puts", &[Object::string("hello")]), None);
    }
}
