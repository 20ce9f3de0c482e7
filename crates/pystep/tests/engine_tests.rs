//! Integration tests for the interpreter: program output, exceptions and the
//! events reported to a tracer.

use std::thread;

use pretty_assertions::assert_eq;
use pystep::{
    CollectStringPrint, ExcType, InputLines, NoPrint, NoopTracer, Program, RecordingTracer, RunFailure, TraceEvent,
};

const FILE: &str = "test.py";

/// Deep recursion needs more native stack than a test thread has.
const STACK_SIZE: usize = 256 * 1024 * 1024;

fn run_with_input(code: &str, input: &str) -> (String, Result<(), RunFailure>) {
    let program = Program::compile(code, FILE).unwrap();
    let input = InputLines::new(input);
    thread::Builder::new()
        .stack_size(STACK_SIZE)
        .spawn(move || {
            let mut print = CollectStringPrint::new();
            let result = program.run(&mut NoopTracer, &mut print, input);
            (print.into_output(), result)
        })
        .unwrap()
        .join()
        .unwrap()
}

fn run(code: &str) -> (String, Result<(), RunFailure>) {
    run_with_input(code, "")
}

fn output_of(code: &str) -> String {
    let (output, result) = run(code);
    assert_eq!(result, Ok(()), "program failed with output {output:?}");
    output
}

fn exception_of(code: &str) -> pystep::Exception {
    match run(code).1 {
        Err(RunFailure::Exception(exc)) => exc,
        other => panic!("expected an exception, got {other:?}"),
    }
}

fn trace(code: &str) -> RecordingTracer {
    let program = Program::compile(code, FILE).unwrap();
    let mut tracer = RecordingTracer::new();
    program.run(&mut tracer, &mut NoPrint, InputLines::empty()).unwrap();
    tracer
}

// ============================================================================
// Values and operators
// ============================================================================

#[test]
fn arithmetic() {
    assert_eq!(output_of("print(1 + 2, 7 // 2, 7 % 3, 2 ** 10, 7 / 2)"), "3 3 1 1024 3.5\n");
    assert_eq!(output_of("print(-7 // 2, -7 % 3)"), "-4 2\n");
}

#[test]
fn integers_promote_to_arbitrary_precision() {
    assert_eq!(output_of("print(2 ** 100)"), "1267650600228229401496703205376\n");
    assert_eq!(output_of("x = 9223372036854775807\nprint(x + 1)"), "9223372036854775808\n");
}

#[test]
fn fstrings_with_format_specs() {
    let code = "x = 3.14159\nn = 42\nprint(f\"{x:.2f} {'a'!r} {n:>5}| {1234567:,}\")";
    assert_eq!(output_of(code), "3.14 'a'    42| 1,234,567\n");
}

#[test]
fn string_methods() {
    let code = "s = \"a,b,c\"\nprint(s.split(\",\"), \"-\".join([\"x\", \"y\"]), s.upper(), \"  hi \".strip())";
    assert_eq!(output_of(code), "['a', 'b', 'c'] x-y A,B,C hi\n");
    assert_eq!(output_of("print('{} + {} = {}'.format(1, 2, 3))"), "1 + 2 = 3\n");
}

#[test]
fn list_operations() {
    let code = "xs = [3, 1, 2]\nxs.append(0)\nxs.sort()\nprint(xs, sorted(xs, reverse=True), xs[-1], xs[1:3])";
    assert_eq!(output_of(code), "[0, 1, 2, 3] [3, 2, 1, 0] 3 [1, 2]\n");
}

#[test]
fn dict_operations() {
    let code = "d = {\"a\": 1}\nd[\"b\"] = 2\nprint(d, len(d), d.get(\"c\", 0), list(d.keys()))";
    assert_eq!(output_of(code), "{'a': 1, 'b': 2} 2 0 ['a', 'b']\n");
}

#[test]
fn comprehensions() {
    let code = "print([x * x for x in range(5) if x % 2 == 0], {k: v for k, v in zip(\"ab\", [1, 2])})";
    assert_eq!(output_of(code), "[0, 4, 16] {'a': 1, 'b': 2}\n");
}

#[test]
fn unpacking_with_star() {
    assert_eq!(output_of("first, *rest = [1, 2, 3]\nprint(first, rest)"), "1 [2, 3]\n");
}

// ============================================================================
// Functions and classes
// ============================================================================

#[test]
fn closures_rebind_with_nonlocal() {
    let code = "\
def counter():
    n = 0
    def inc():
        nonlocal n
        n += 1
        return n
    return inc
c = counter()
c()
print(c())
";
    assert_eq!(output_of(code), "2\n");
}

#[test]
fn classes_with_inheritance() {
    let code = "\
class Animal:
    def __init__(self, name):
        self.name = name
    def speak(self):
        return '...'
    def __str__(self):
        return f'{self.name} says {self.speak()}'
class Dog(Animal):
    def __init__(self, name):
        super().__init__(name)
    def speak(self):
        return 'woof'
print(Dog('Rex'))
";
    assert_eq!(output_of(code), "Rex says woof\n");
}

#[test]
fn recursion() {
    let code = "\
def fib(n):
    if n < 2:
        return n
    return fib(n - 1) + fib(n - 2)
print(fib(15))
";
    assert_eq!(output_of(code), "610\n");
}

#[test]
fn recursion_limit() {
    let exc = exception_of("def f(n):\n    return f(n + 1)\nf(0)\n");
    assert_eq!(exc.exc_type(), ExcType::RecursionError);
    assert_eq!(exc.message(), "maximum recursion depth exceeded");
}

#[test]
fn setrecursionlimit_cannot_exceed_the_native_stack() {
    let code = "\
import sys
sys.setrecursionlimit(1000000)
print(sys.getrecursionlimit())
def f(n):
    return f(n + 1)
f(0)
";
    let (output, result) = run(code);
    assert_eq!(output, "1000000\n");
    match result {
        Err(RunFailure::Exception(exc)) => assert_eq!(exc.exc_type(), ExcType::RecursionError),
        other => panic!("expected a RecursionError, got {other:?}"),
    }
}

// ============================================================================
// Exceptions
// ============================================================================

#[test]
fn caught_exceptions_run_handlers_and_finally() {
    let code = "\
try:
    [1][5]
except IndexError as e:
    print('caught', e)
finally:
    print('done')
";
    assert_eq!(output_of(code), "caught list index out of range\ndone\n");
}

#[test]
fn uncaught_exceptions_match_cpython_messages() {
    let exc = exception_of("x = 1 / 0");
    assert_eq!(exc.exc_type(), ExcType::ZeroDivisionError);
    assert_eq!(exc.to_string(), "ZeroDivisionError: division by zero");

    let exc = exception_of("print(y)");
    assert_eq!(exc.exc_type(), ExcType::NameError);
    assert_eq!(exc.message(), "name 'y' is not defined");
}

#[test]
fn user_exception_classes_keep_their_name() {
    let exc = exception_of("class MyError(ValueError):\n    pass\nraise MyError('bad')\n");
    assert_eq!(exc.type_name(), "MyError");
    assert!(exc.exc_type().is_subclass_of(ExcType::ValueError));
}

#[test]
fn zero_division_is_arithmetic() {
    assert!(ExcType::ZeroDivisionError.is_subclass_of(ExcType::ArithmeticError));
    assert!(ExcType::ZeroDivisionError.is_subclass_of(ExcType::Exception));
    assert!(!ExcType::ValueError.is_subclass_of(ExcType::ArithmeticError));
}

#[test]
fn sys_exit() {
    assert_eq!(run("import sys\nprint('a')\nsys.exit(0)\nprint('b')").0, "a\n");
    assert_eq!(run("import sys\nsys.exit()").1, Ok(()));
    let exc = exception_of("import sys\nsys.exit(3)");
    assert_eq!(exc.exc_type(), ExcType::SystemExit);
}

// ============================================================================
// Modules
// ============================================================================

#[test]
fn math_module() {
    assert_eq!(
        output_of("import math\nprint(math.sqrt(16), math.floor(2.7), math.gcd(12, 18), math.factorial(5))"),
        "4.0 2 6 120\n"
    );
    let exc = exception_of("import math\nmath.sqrt(-1)");
    assert_eq!(exc.to_string(), "ValueError: math domain error");
}

#[test]
fn heapq_module() {
    let code = "\
import heapq
h = []
for x in [5, 1, 3]:
    heapq.heappush(h, x)
print(heapq.heappop(h), h)
";
    assert_eq!(output_of(code), "1 [3, 5]\n");
}

#[test]
fn seeded_random_is_repeatable() {
    let code = "\
import random
random.seed(42)
a = [random.randint(1, 100) for _ in range(5)]
random.seed(42)
b = [random.randint(1, 100) for _ in range(5)]
print(a == b, all(1 <= x <= 100 for x in a))
";
    assert_eq!(output_of(code), "True True\n");
}

#[test]
fn unknown_module() {
    let exc = exception_of("import numpy");
    assert_eq!(exc.to_string(), "ModuleNotFoundError: No module named 'numpy'");
}

#[test]
fn stderr_shares_the_output_stream() {
    assert_eq!(output_of("import sys\nprint('a')\nprint('b', file=sys.stderr)\nprint('c')"), "a\nb\nc\n");
}

// ============================================================================
// Input
// ============================================================================

#[test]
fn input_reads_lines() {
    let (output, result) = run_with_input("a = int(input())\nb = int(input())\nprint(a + b)", "5\n7\n");
    assert_eq!(result, Ok(()));
    assert_eq!(output, "12\n");
}

#[test]
fn input_past_the_end() {
    let exc = exception_of("input()");
    assert_eq!(exc.to_string(), "EOFError: EOF when reading a line");
}

// ============================================================================
// Compile errors
// ============================================================================

#[test]
fn unterminated_string_is_a_syntax_error() {
    let err = Program::compile("print(\"hello)", FILE).unwrap_err();
    assert_eq!(err.exc_type, ExcType::SyntaxError);
    assert_eq!(err.line, 1);
}

#[test]
fn unsupported_statements_fail_at_compile_time() {
    let err = Program::compile("match x:\n    case 1:\n        pass\n", FILE).unwrap_err();
    assert_eq!(err.exc_type, ExcType::NotImplementedError);
}

// ============================================================================
// Tracing
// ============================================================================

#[test]
fn loop_headers_fire_once_per_iteration() {
    let tracer = trace("total = 0\nfor i in range(2):\n    total += i\nprint(total)\n");
    assert_eq!(tracer.lines_in(FILE), vec![1, 2, 3, 2, 3, 2, 4]);
}

#[test]
fn function_calls_report_lines_and_returns() {
    let tracer = trace("def f(x):\n    return x + 1\ny = f(1)\n");
    assert_eq!(tracer.lines_in(FILE), vec![1, 3, 2]);
    assert_eq!(
        tracer.events()[3],
        TraceEvent::Return {
            function: "f".to_owned(),
            line: 2,
            value: "2".to_owned(),
        }
    );
    assert!(matches!(
        tracer.events().last(),
        Some(TraceEvent::Return { function, .. }) if function == "<module>"
    ));
}

#[test]
fn library_lines_use_their_own_filename() {
    let tracer = trace("import heapq\nh = [3, 1]\nheapq.heapify(h)\n");
    assert_eq!(tracer.lines_in(FILE), vec![1, 2, 3]);
    assert!(!tracer.lines_in("<frozen heapq>").is_empty());
}

#[test]
fn uncaught_exception_is_reported_once_from_the_innermost_frame() {
    let program = Program::compile("def f():\n    return 1 / 0\nf()\n", FILE).unwrap();
    let mut tracer = RecordingTracer::new();
    let result = program.run(&mut tracer, &mut CollectStringPrint::new(), InputLines::empty());
    assert!(matches!(result, Err(RunFailure::Exception(_))));
    let exceptions: Vec<&TraceEvent> = tracer
        .events()
        .iter()
        .filter(|event| matches!(event, TraceEvent::Exception { .. }))
        .collect();
    assert_eq!(
        exceptions,
        vec![&TraceEvent::Exception {
            function: "f".to_owned(),
            line: 2,
            message: "ZeroDivisionError: division by zero".to_owned(),
        }]
    );
}

#[test]
fn caught_exceptions_are_not_reported() {
    let tracer = trace("try:\n    1 / 0\nexcept ZeroDivisionError:\n    pass\n");
    assert!(!tracer.events().iter().any(|event| matches!(event, TraceEvent::Exception { .. })));
}

fn exception_events(code: &str) -> Vec<TraceEvent> {
    let program = Program::compile(code, FILE).unwrap();
    let mut tracer = RecordingTracer::new();
    let result = program.run(&mut tracer, &mut NoPrint, InputLines::empty());
    assert!(matches!(result, Err(RunFailure::Exception(_))));
    tracer
        .events()
        .iter()
        .filter(|event| matches!(event, TraceEvent::Exception { .. }))
        .cloned()
        .collect()
}

#[test]
fn exception_passing_an_unmatched_handler_is_reported_where_it_was_raised() {
    let code = "def g():\n    x = 1\n    return 1 / 0\ntry:\n    g()\nexcept ValueError:\n    pass\n";
    assert_eq!(
        exception_events(code),
        vec![TraceEvent::Exception {
            function: "g".to_owned(),
            line: 3,
            message: "ZeroDivisionError: division by zero".to_owned(),
        }]
    );
}

#[test]
fn exception_is_reported_after_finally_runs() {
    let program = Program::compile("try:\n    1 / 0\nfinally:\n    y = 2\n", FILE).unwrap();
    let mut tracer = RecordingTracer::new();
    let _ = program.run(&mut tracer, &mut NoPrint, InputLines::empty());
    let events = tracer.events();
    let exception = events
        .iter()
        .position(|event| matches!(event, TraceEvent::Exception { .. }))
        .unwrap();
    assert!(
        events[..exception]
            .iter()
            .any(|event| matches!(event, TraceEvent::Line { line: 4, .. }))
    );
    assert!(matches!(&events[exception], TraceEvent::Exception { line: 2, .. }));
    assert_eq!(exception, events.len() - 1);
}
