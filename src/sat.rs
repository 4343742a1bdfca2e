// Stand-alone DIMACS CNF parser and brute-force SAT solver. The parser
// rides on the MiniC scanner after a comment-aware pre-pass that strips
// the 'c' lines DIMACS allows.

use crate::scanner::{Scanner, Symbol};
use crate::CompileError;
use std::path::Path;

pub struct SatInstance {
    pub name: String,

    pub variables: u32,
    pub clauses: u32,

    // one positive and one negative slot per variable and clause
    instance: Vec<bool>,
    assignment: Vec<bool>,
}

const SAT: bool = true;
const UNSAT: bool = false;

impl SatInstance {
    fn literal_slot(&self, clause: u32, variable: u32, negated: bool) -> usize {
        (clause * 2 * self.variables + 2 * variable + negated as u32) as usize
    }

    fn clause_may_be_true(&self, clause: u32, depth: u32) -> bool {
        let mut variable = 0;

        while variable <= depth {
            if self.assignment[variable as usize] {
                if self.instance[self.literal_slot(clause, variable, false)] {
                    return true;
                }
            } else if self.instance[self.literal_slot(clause, variable, true)] {
                // the variable is assigned false because it is below depth
                return true;
            }

            variable += 1;
        }

        while variable < self.variables {
            // the variable is unassigned because it is beyond depth
            if self.instance[self.literal_slot(clause, variable, false)] {
                return true;
            } else if self.instance[self.literal_slot(clause, variable, true)] {
                return true;
            }

            variable += 1;
        }

        false
    }

    fn instance_may_be_true(&self, depth: u32) -> bool {
        for clause in 0..self.clauses {
            if !self.clause_may_be_true(clause, depth) {
                // the clause is false under the current assignment
                return false;
            }
        }

        true
    }

    fn babysat(&mut self, depth: u32) -> bool {
        if depth == self.variables {
            return SAT;
        }

        self.assignment[depth as usize] = true;

        if self.instance_may_be_true(depth) && self.babysat(depth + 1) == SAT {
            return SAT;
        }

        self.assignment[depth as usize] = false;

        if self.instance_may_be_true(depth) && self.babysat(depth + 1) == SAT {
            return SAT;
        }

        UNSAT
    }

    pub fn solve(&mut self) -> Option<&[bool]> {
        if self.babysat(0) == SAT {
            Some(&self.assignment)
        } else {
            None
        }
    }

    pub fn print_dimacs(&self) {
        println!("p cnf {} {}", self.variables, self.clauses);

        for clause in 0..self.clauses {
            for variable in 0..self.variables {
                if self.instance[self.literal_slot(clause, variable, false)] {
                    print!("{} ", variable + 1);
                } else if self.instance[self.literal_slot(clause, variable, true)] {
                    print!("-{} ", variable + 1);
                }
            }

            println!("0");
        }
    }
}

// discard whitespace and 'c' comment lines; a comment only counts at the
// beginning of a line
fn dimacs_find_next_character(scanner: &mut Scanner, mut new_line: bool) {
    let mut in_comment = false;

    loop {
        if in_comment {
            scanner.get_character();

            if scanner.ch == Some(b'\n') || scanner.ch == Some(b'\r') {
                // comments end with new line
                in_comment = false;
            } else if scanner.ch.is_none() {
                return;
            }
        } else if new_line {
            new_line = false;

            if scanner.ch == Some(b'c') {
                // 'c' at the beginning of a line begins a comment
                in_comment = true;
            }
        } else if scanner.ch == Some(b' ') || scanner.ch == Some(b'\t') {
            scanner.get_character();
        } else if scanner.ch == Some(b'\n') || scanner.ch == Some(b'\r') {
            new_line = true;

            scanner.get_character();
        } else {
            return;
        }
    }
}

fn dimacs_next_symbol(scanner: &mut Scanner) -> Result<(), CompileError> {
    dimacs_find_next_character(scanner, false);

    scanner.next_symbol()
}

fn dimacs_word(scanner: &mut Scanner, word: &str) -> Result<(), CompileError> {
    if scanner.sym == Symbol::Identifier {
        if scanner.identifier == word {
            return dimacs_next_symbol(scanner);
        }

        return Err(scanner.error(format!(
            "\"{}\" expected but \"{}\" found",
            word, scanner.identifier
        )));
    }

    Err(scanner.error(format!("\"{}\" expected but \"{}\" found", word, scanner.sym)))
}

fn dimacs_number(scanner: &mut Scanner) -> Result<u32, CompileError> {
    if scanner.sym == Symbol::Integer {
        let number = scanner.literal;

        dimacs_next_symbol(scanner)?;

        Ok(number)
    } else {
        Err(scanner.error(format!("\"integer\" expected but \"{}\" found", scanner.sym)))
    }
}

fn dimacs_clause(scanner: &mut Scanner, sat: &mut SatInstance, clause: u32) -> Result<(), CompileError> {
    loop {
        let mut negated = false;

        if scanner.sym == Symbol::Minus {
            negated = true;

            dimacs_next_symbol(scanner)?;
        }

        if scanner.sym == Symbol::Integer {
            if scanner.literal == 0 {
                dimacs_next_symbol(scanner)?;

                return Ok(());
            } else if scanner.literal > sat.variables {
                return Err(scanner.error("clause exceeds declared number of variables"));
            }

            // literal encoding starts at 0
            let literal = scanner.literal - 1;

            let slot = sat.literal_slot(clause, literal, negated);

            sat.instance[slot] = true;
        } else if scanner.sym == Symbol::Eof {
            return Ok(());
        } else {
            return Err(scanner.error(format!(
                "\"integer\" expected but \"{}\" found",
                scanner.sym
            )));
        }

        dimacs_next_symbol(scanner)?;
    }
}

pub fn load_dimacs(path: &Path) -> Result<SatInstance, CompileError> {
    let mut scanner = Scanner::from_file(path)?;

    // ignore all comments before the problem line
    dimacs_find_next_character(&mut scanner, true);

    dimacs_next_symbol(&mut scanner)?;

    dimacs_word(&mut scanner, "p")?;
    dimacs_word(&mut scanner, "cnf")?;

    let variables = dimacs_number(&mut scanner)?;
    let clauses = dimacs_number(&mut scanner)?;

    let mut sat = SatInstance {
        name: path.display().to_string(),
        variables,
        clauses,
        instance: vec![false; (clauses * 2 * variables) as usize],
        assignment: vec![false; variables as usize],
    };

    let mut parsed = 0;

    while parsed < clauses {
        if scanner.sym != Symbol::Eof {
            dimacs_clause(&mut scanner, &mut sat, parsed)?;

            parsed += 1;
        } else {
            return Err(scanner.error("instance has fewer clauses than declared"));
        }
    }

    if scanner.sym != Symbol::Eof {
        return Err(scanner.error("instance has more clauses than declared"));
    }

    Ok(sat)
}

pub fn solve_dimacs(path: &Path) -> Result<(), CompileError> {
    let mut sat = load_dimacs(path)?;

    println!(
        "{} clauses with {} declared variables loaded from {}",
        sat.clauses, sat.variables, sat.name
    );

    sat.print_dimacs();

    match sat.solve() {
        Some(assignment) => {
            print!("{} is satisfiable with ", path.display());

            for (variable, value) in assignment.iter().enumerate() {
                if *value {
                    print!("{} ", variable + 1);
                } else {
                    print!("-{} ", variable + 1);
                }
            }

            println!();
        }
        None => println!("{} is unsatisfiable", path.display()),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn instance(text: &str) -> SatInstance {
        let mut file = tempfile::NamedTempFile::new().unwrap();

        file.write_all(text.as_bytes()).unwrap();

        load_dimacs(file.path()).unwrap()
    }

    #[test]
    fn satisfiable_instance() {
        let mut sat = instance("c tiny\np cnf 2 2\n1 -2 0\n-1 -2 0\n");

        let assignment = sat.solve().unwrap().to_vec();

        // both clauses hold with variable 2 false
        assert!(!assignment[1]);
    }

    #[test]
    fn unsatisfiable_instance() {
        let mut sat = instance("p cnf 1 2\n1 0\n-1 0\n");

        assert!(sat.solve().is_none());
    }

    #[test]
    fn malformed_instances_are_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"p cnf 1 2\n1 0\n").unwrap();

        assert!(load_dimacs(file.path()).is_err());

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"p dnf 1 1\n1 0\n").unwrap();

        assert!(load_dimacs(file.path()).is_err());
    }
}
